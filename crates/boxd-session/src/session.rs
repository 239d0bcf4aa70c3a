//! A named, long-lived execution context fronted by one control child.

use crate::host::isolation;
use crate::supervisor::ProcessSet;
use crate::transport::{ControlChannel, SpawnSpec};
use boxd_core::{Config, ExecEvent, ExecResult, Result, SandboxError};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;

/// Options for creating a session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub id: String,
    /// Initial working directory; must be absolute when provided.
    pub cwd: Option<String>,
    /// Environment overrides injected into the control child (and thus the
    /// shell and everything it spawns).
    pub env: Vec<(String, String)>,
    /// Ask for a PID/mount-namespaced shell.
    pub isolation: bool,
}

/// Per-call exec options.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// One-shot working directory override; must be absolute.
    pub cwd: Option<String>,
}

pub struct Session {
    pub id: String,
    cwd: String,
    isolated: bool,
    created_at: DateTime<Utc>,
    channel: ControlChannel,
    processes: ProcessSet,
}

impl Session {
    /// Spawn the control child and wait until its shell is ready.
    pub async fn spawn(opts: SessionOptions, config: &Config) -> Result<Arc<Self>> {
        if let Some(cwd) = &opts.cwd {
            require_absolute(cwd)?;
        }

        // The probe runs in the daemon process and is cached for its whole
        // lifetime; every session reuses the result.
        let namespaces_available = isolation::namespaces_available().await;
        if opts.isolation && !namespaces_available {
            if config.strict_isolation {
                return Err(SandboxError::Validation(
                    "isolation requested but namespaces are unavailable on this host".into(),
                ));
            }
            info!(session = %opts.id, "isolation not available, session will run unisolated");
        }

        let cwd = opts
            .cwd
            .clone()
            .unwrap_or_else(|| config.workspace_dir.to_string_lossy().into_owned());

        let channel = ControlChannel::spawn(
            SpawnSpec {
                session_id: opts.id.clone(),
                cwd: cwd.clone(),
                isolated: opts.isolation,
                namespaces_available,
                env: opts.env,
            },
            config,
        )
        .await?;

        Ok(Arc::new(Self {
            processes: ProcessSet::new(opts.id.clone(), config.temp_dir.clone()),
            id: opts.id,
            cwd,
            isolated: opts.isolation,
            created_at: Utc::now(),
            channel,
        }))
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn isolated(&self) -> bool {
        self.isolated
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_alive()
    }

    /// The session's background processes.
    pub fn processes(&self) -> &ProcessSet {
        &self.processes
    }

    /// Run a command to completion inside the session shell.
    pub async fn exec(&self, command: &str, opts: ExecOptions) -> Result<ExecResult> {
        if !self.channel.is_alive() {
            return Err(SandboxError::NotInitialized);
        }
        if let Some(cwd) = &opts.cwd {
            require_absolute(cwd)?;
        }

        let started = Instant::now();
        let raw = self.channel.request(command.to_string(), opts.cwd).await?;
        Ok(ExecResult::new(
            command,
            raw.stdout,
            raw.stderr,
            raw.exit_code,
            started.elapsed().as_millis() as u64,
        ))
    }

    /// Run a command, receiving its output as a finite event stream:
    /// one `start`, chunks in emission order, one terminal event. Dropping
    /// the receiver cancels delivery; the command keeps running.
    pub async fn exec_stream(
        &self,
        command: &str,
        opts: ExecOptions,
    ) -> Result<mpsc::Receiver<ExecEvent>> {
        if !self.channel.is_alive() {
            return Err(SandboxError::NotInitialized);
        }
        if let Some(cwd) = &opts.cwd {
            require_absolute(cwd)?;
        }
        self.channel.stream_request(command.to_string(), opts.cwd).await
    }

    /// Tear the session down: background processes first, then the control
    /// child (which drags the shell and its children along).
    pub async fn destroy(&self) {
        let killed = self.processes.kill_all().await;
        if killed > 0 {
            info!(session = %self.id, killed, "killed background processes");
        }
        self.processes.remove_capture_files().await;
        self.channel.shutdown().await;
    }
}

pub(crate) fn require_absolute(path: &str) -> Result<()> {
    if Path::new(path).is_absolute() {
        Ok(())
    } else {
        Err(SandboxError::Validation(format!(
            "path must be absolute: {path}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_path_validation() {
        assert!(require_absolute("/workspace").is_ok());
        assert!(require_absolute("relative/dir").is_err());
        assert!(require_absolute("./x").is_err());
    }
}
