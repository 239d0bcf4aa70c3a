//! Domain error type shared by every boxd component.
//!
//! Each variant carries a stable wire code (`code()`) and an HTTP status
//! (`http_status()`); the axum adapter turns both into the JSON error
//! envelope. Component code never maps errors to statuses itself.

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, SandboxError>;

/// The kind of resource a `NotFound` error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Session,
    Process,
    Context,
    Port,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Session => "session",
            Self::Process => "process",
            Self::Context => "context",
            Self::Port => "port",
        };
        f.write_str(s)
    }
}

/// Every failure a core component can surface.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid proxy url: {0}")]
    InvalidProxyUrl(String),

    #[error("port {0} is already exposed")]
    PortAlreadyExposed(u16),

    #[error("port {0} is not exposed")]
    PortNotExposed(u16),

    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: String },

    #[error("session terminated")]
    SessionTerminated,

    #[error("session is not initialized")]
    NotInitialized,

    #[error("command timed out after {0}ms")]
    Timeout(u64),

    #[error("failed to start process: {0}")]
    ProcessStart(String),

    #[error("filesystem operation failed: {0}")]
    Filesystem(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("invalid git ref: {0}")]
    GitInvalidRef(String),

    #[error("repository not found: {0}")]
    RepoNotFound(String),

    #[error("git operation failed: {0}")]
    GitOperationFailed(String),

    #[error("interpreter is not ready ({progress}%)")]
    InterpreterNotReady { progress: u8, retry_after: u64 },

    #[error("no {language} contexts available, pool exhausted")]
    PoolExhausted { language: String },

    #[error("interpreter circuit open")]
    CircuitOpen { retry_after: u64 },

    #[error("upstream on port {port} unreachable: {message}")]
    UpstreamUnreachable { port: u16, message: String },

    #[error("{0}")]
    Internal(String),
}

impl SandboxError {
    /// Helper for the common `NotFound` construction.
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable wire code surfaced in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::InvalidCommand(_) => "INVALID_COMMAND",
            Self::InvalidPort(_) => "INVALID_PORT",
            Self::InvalidProxyUrl(_) => "INVALID_PROXY_URL",
            Self::PortAlreadyExposed(_) => "PORT_ALREADY_EXPOSED",
            Self::PortNotExposed(_) => "PORT_NOT_EXPOSED",
            Self::NotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::SessionTerminated => "SESSION_TERMINATED",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::Timeout(_) => "TIMEOUT",
            Self::ProcessStart(_) => "PROCESS_START_ERROR",
            Self::Filesystem(_) => "FILESYSTEM_ERROR",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::GitInvalidRef(_) => "GIT_INVALID_REF",
            Self::RepoNotFound(_) => "REPO_NOT_FOUND",
            Self::GitOperationFailed(_) => "GIT_OPERATION_FAILED",
            Self::InterpreterNotReady { .. } => "INTERPRETER_NOT_READY",
            Self::PoolExhausted { .. } => "POOL_EXHAUSTED",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::UpstreamUnreachable { .. } => "UPSTREAM_UNREACHABLE",
            Self::Internal(_) => "UNKNOWN",
        }
    }

    /// HTTP status the outer layer responds with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::InvalidCommand(_)
            | Self::InvalidPort(_)
            | Self::GitInvalidRef(_) => 400,
            Self::NotFound { .. }
            | Self::PortNotExposed(_)
            | Self::FileNotFound(_)
            | Self::RepoNotFound(_) => 404,
            Self::PortAlreadyExposed(_) => 409,
            Self::InterpreterNotReady { .. } | Self::CircuitOpen { .. } => 503,
            Self::UpstreamUnreachable { .. } => 502,
            Self::InvalidProxyUrl(_)
            | Self::SessionTerminated
            | Self::NotInitialized
            | Self::Timeout(_)
            | Self::ProcessStart(_)
            | Self::Filesystem(_)
            | Self::GitOperationFailed(_)
            | Self::PoolExhausted { .. }
            | Self::Internal(_) => 500,
        }
    }

    /// `Retry-After` seconds for 503-class errors.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::InterpreterNotReady { retry_after, .. } | Self::CircuitOpen { retry_after } => {
                Some(*retry_after)
            }
            _ => None,
        }
    }

    /// Structured context forwarded in the envelope, when the variant has any.
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::NotFound { kind, id } => Some(json!({ "resource": kind, "id": id })),
            Self::PortAlreadyExposed(port) | Self::PortNotExposed(port) => {
                Some(json!({ "port": port }))
            }
            Self::Timeout(ms) => Some(json!({ "timeout_ms": ms })),
            Self::InterpreterNotReady {
                progress,
                retry_after,
            } => Some(json!({ "progress": progress, "retry_after": retry_after })),
            Self::PoolExhausted { language } => Some(json!({ "language": language })),
            Self::UpstreamUnreachable { port, message } => {
                Some(json!({ "port": port, "message": message }))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_contract() {
        assert_eq!(SandboxError::Validation("x".into()).http_status(), 400);
        assert_eq!(
            SandboxError::not_found(ResourceKind::Process, "p1").http_status(),
            404
        );
        assert_eq!(SandboxError::PortAlreadyExposed(8080).http_status(), 409);
        assert_eq!(
            SandboxError::InterpreterNotReady {
                progress: 40,
                retry_after: 5
            }
            .http_status(),
            503
        );
        assert_eq!(
            SandboxError::UpstreamUnreachable {
                port: 8080,
                message: "refused".into()
            }
            .http_status(),
            502
        );
        assert_eq!(SandboxError::Internal("boom".into()).http_status(), 500);
    }

    #[test]
    fn retry_after_only_on_503s() {
        assert_eq!(
            SandboxError::CircuitOpen { retry_after: 60 }.retry_after(),
            Some(60)
        );
        assert_eq!(SandboxError::Timeout(30_000).retry_after(), None);
    }

    #[test]
    fn not_ready_context_carries_progress() {
        let err = SandboxError::InterpreterNotReady {
            progress: 55,
            retry_after: 5,
        };
        let ctx = err.context().unwrap();
        assert_eq!(ctx["progress"], 55);
        assert_eq!(err.code(), "INTERPRETER_NOT_READY");
    }
}
