//! Environment-driven daemon configuration.
//!
//! All knobs come from the environment so the same binary works as the
//! daemon and as the re-executed session host (which inherits them).

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable names consumed by the core.
pub mod env_keys {
    pub const COMMAND_TIMEOUT_MS: &str = "COMMAND_TIMEOUT_MS";
    pub const CLEANUP_INTERVAL_MS: &str = "CLEANUP_INTERVAL_MS";
    pub const TEMP_FILE_MAX_AGE_MS: &str = "TEMP_FILE_MAX_AGE_MS";
    pub const TEMP_DIR: &str = "TEMP_DIR";
    pub const SANDBOX_VERSION: &str = "SANDBOX_VERSION";
    pub const STRICT_ISOLATION: &str = "BOXD_STRICT_ISOLATION";

    /// Set by the parent on the control child it spawns.
    pub const SESSION_ID: &str = "SESSION_ID";
    pub const SESSION_CWD: &str = "SESSION_CWD";
    pub const SESSION_ISOLATED: &str = "SESSION_ISOLATED";
    /// Result of the daemon's one-time namespace capability probe, handed
    /// down so hosts never re-probe.
    pub const NAMESPACES_AVAILABLE: &str = "BOXD_NAMESPACES_AVAILABLE";
    /// Routes the binary into session-host mode.
    pub const SESSION_HOST: &str = "BOXD_SESSION_HOST";
}

/// Daemon configuration resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deadline for a single `exec` round-trip through a session.
    pub command_timeout: Duration,
    /// Cadence of the session-host temp file reaper.
    pub cleanup_interval: Duration,
    /// Age past which orphaned transport/capture files are deleted.
    pub temp_file_max_age: Duration,
    /// Root for transport scripts and process capture files.
    pub temp_dir: PathBuf,
    /// Surfaced by `/api/version`.
    pub sandbox_version: String,
    /// Initial working directory for the default session and contexts.
    pub workspace_dir: PathBuf,
    /// Treat `isolation: true` without namespace support as an error.
    pub strict_isolation: bool,
}

impl Config {
    /// Read configuration from the environment, falling back to defaults.
    ///
    /// Unparseable values log a warning and fall back rather than fail:
    /// the daemon must come up even with a misconfigured container image.
    pub fn from_env() -> Self {
        Self {
            command_timeout: env_duration_ms(env_keys::COMMAND_TIMEOUT_MS, 30_000),
            cleanup_interval: env_duration_ms(env_keys::CLEANUP_INTERVAL_MS, 60_000),
            temp_file_max_age: env_duration_ms(env_keys::TEMP_FILE_MAX_AGE_MS, 3_600_000),
            temp_dir: std::env::var(env_keys::TEMP_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp")),
            sandbox_version: std::env::var(env_keys::SANDBOX_VERSION)
                .unwrap_or_else(|_| "unknown".to_string()),
            workspace_dir: PathBuf::from("/workspace"),
            strict_isolation: env_flag(env_keys::STRICT_ISOLATION),
        }
    }

    /// Override the workspace directory (set from the CLI flag).
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(30_000),
            cleanup_interval: Duration::from_millis(60_000),
            temp_file_max_age: Duration::from_millis(3_600_000),
            temp_dir: PathBuf::from("/tmp"),
            sandbox_version: "unknown".to_string(),
            workspace_dir: PathBuf::from("/workspace"),
            strict_isolation: false,
        }
    }
}

fn env_duration_ms(key: &str, default_ms: u64) -> Duration {
    let ms = match std::env::var(key) {
        Ok(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
            warn!(%key, value = %raw, "unparseable duration, using default");
            default_ms
        }),
        Err(_) => default_ms,
    };
    Duration::from_millis(ms)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}
