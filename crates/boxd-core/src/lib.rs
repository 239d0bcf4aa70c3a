//! Core domain types and port definitions for boxd.
//!
//! This crate holds everything the other crates agree on: the domain error
//! with its stable wire codes, the environment-driven configuration, the
//! typed event records that flow over streaming endpoints, and the kernel
//! port traits the interpreter pool is built against. No adapter-specific
//! dependencies live here.

pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod files;
pub mod kernel;
pub mod process;

pub use config::Config;
pub use error::{ResourceKind, Result, SandboxError};
pub use exec::{ExecEvent, ExecResult};
pub use process::{ProcessInfo, ProcessLogs, ProcessStatus, ProcessStreamEvent};
