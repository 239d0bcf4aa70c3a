//! Shared server state.

use boxd_core::Config;
use boxd_interp::InterpreterService;
use boxd_proxy::PortRegistry;
use boxd_session::SessionRegistry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Everything handlers need, shared behind one Arc.
pub struct ServerContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionRegistry>,
    pub ports: Arc<PortRegistry>,
    pub interp: Arc<InterpreterService>,
    /// Client used by the reverse proxy for upstream requests.
    pub http: reqwest::Client,
    pub started_at: Instant,
    /// Fired by `/api/shutdown` to stop the server gracefully.
    pub shutdown: Arc<Notify>,
}

pub type AppState = Arc<ServerContext>;
