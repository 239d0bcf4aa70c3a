//! Axum adapter: the HTTP surface of the sandbox control plane.
//!
//! Handlers are thin; every operation delegates to a core component
//! (session registry, process supervisor, port registry, interpreter
//! service) and maps its result into the shared response envelope.

pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod sse;
pub mod state;

pub use bootstrap::{build_state, serve};
pub use routes::create_router;
pub use state::{AppState, ServerContext};
