//! Parent-side control-process transport.
//!
//! Spawns the session host (this binary re-executed with
//! `BOXD_SESSION_HOST=1`), writes one JSON request per line to its stdin and
//! matches replies from its stdout by correlation id. Stream events are
//! routed to per-correlation channels; the child's stderr is drained into
//! the daemon log.

use crate::protocol::{ControlReply, ControlRequest, encode_line};
use boxd_core::config::env_keys;
use boxd_core::{Config, ExecEvent, Result, SandboxError};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Raw payload of a `result` reply before `ExecResult` shaping.
pub(crate) struct RawResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Outstanding correlations, keyed by request id.
#[derive(Default)]
struct PendingMap {
    unary: HashMap<Uuid, oneshot::Sender<Result<RawResult>>>,
    streams: HashMap<Uuid, mpsc::Sender<ExecEvent>>,
}

impl PendingMap {
    /// Reject everything in flight; used on child exit and shutdown.
    fn fail_all(&mut self, message: &str) {
        for (_, tx) in self.unary.drain() {
            let _ = tx.send(Err(SandboxError::SessionTerminated));
        }
        for (_, tx) in self.streams.drain() {
            let _ = tx.try_send(ExecEvent::Error {
                message: message.to_string(),
            });
        }
    }
}

/// Options the transport needs to spawn a control child.
pub(crate) struct SpawnSpec {
    pub session_id: String,
    pub cwd: String,
    pub isolated: bool,
    /// The daemon's cached capability probe result, handed to the host.
    pub namespaces_available: bool,
    pub env: Vec<(String, String)>,
}

pub(crate) struct ControlChannel {
    session_id: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: Arc<Mutex<PendingMap>>,
    alive: Arc<AtomicBool>,
    command_timeout: Duration,
}

impl ControlChannel {
    /// Spawn the control child and wait for its `ready` hello.
    pub async fn spawn(spec: SpawnSpec, config: &Config) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| SandboxError::Internal(format!("cannot resolve daemon binary: {e}")))?;

        let mut cmd = Command::new(exe);
        cmd.env(env_keys::SESSION_HOST, "1")
            .env(env_keys::SESSION_ID, &spec.session_id)
            .env(env_keys::SESSION_CWD, &spec.cwd)
            .env(env_keys::SESSION_ISOLATED, if spec.isolated { "1" } else { "0" })
            .env(
                env_keys::NAMESPACES_AVAILABLE,
                if spec.namespaces_available { "1" } else { "0" },
            )
            .env(
                env_keys::COMMAND_TIMEOUT_MS,
                config.command_timeout.as_millis().to_string(),
            )
            .env(
                env_keys::CLEANUP_INTERVAL_MS,
                config.cleanup_interval.as_millis().to_string(),
            )
            .env(
                env_keys::TEMP_FILE_MAX_AGE_MS,
                config.temp_file_max_age.as_millis().to_string(),
            )
            .env(env_keys::TEMP_DIR, &config.temp_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Session env overrides go straight into the child's environment so
        // the interactive shell inherits them.
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Internal(format!("failed to spawn session host: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Internal("session host has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Internal("session host has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Internal("session host has no stderr".into()))?;

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(PendingMap::default()));
        let alive = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        spawn_reader(
            spec.session_id.clone(),
            stdout,
            Arc::clone(&pending),
            Arc::clone(&alive),
            ready_tx,
        );
        spawn_stderr_drain(spec.session_id.clone(), stderr);

        let channel = Self {
            session_id: spec.session_id,
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            alive,
            command_timeout: config.command_timeout,
        };

        // The host is unusable until its shell is up.
        match timeout(config.command_timeout, ready_rx).await {
            Ok(Ok(())) => Ok(channel),
            Ok(Err(_)) => Err(SandboxError::SessionTerminated),
            Err(_) => {
                channel.shutdown().await;
                Err(SandboxError::NotInitialized)
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Send one request line; writes are atomic per message.
    async fn send(&self, req: &ControlRequest) -> Result<()> {
        let line = encode_line(req)
            .map_err(|e| SandboxError::Internal(format!("encode control request: {e}")))?;
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| SandboxError::SessionTerminated)?;
        stdin
            .flush()
            .await
            .map_err(|_| SandboxError::SessionTerminated)?;
        Ok(())
    }

    /// Round-trip one `exec`, enforcing the command timeout.
    pub async fn request(&self, command: String, cwd: Option<String>) -> Result<RawResult> {
        if !self.is_alive() {
            return Err(SandboxError::SessionTerminated);
        }
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.unary.insert(id, tx);

        if let Err(e) = self.send(&ControlRequest::Exec { id, command, cwd }).await {
            self.pending.lock().await.unary.remove(&id);
            return Err(e);
        }

        match timeout(self.command_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SandboxError::SessionTerminated),
            Err(_) => {
                // Correlation is dead; a late reply is dropped by the reader.
                self.pending.lock().await.unary.remove(&id);
                Err(SandboxError::Timeout(self.command_timeout.as_millis() as u64))
            }
        }
    }

    /// Start a streaming exec; events arrive on the returned receiver.
    ///
    /// Dropping the receiver cancels delivery: the reader notices the closed
    /// channel and removes the route, while the child keeps running and its
    /// final result is discarded.
    pub async fn stream_request(
        &self,
        command: String,
        cwd: Option<String>,
    ) -> Result<mpsc::Receiver<ExecEvent>> {
        if !self.is_alive() {
            return Err(SandboxError::SessionTerminated);
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(256);
        self.pending.lock().await.streams.insert(id, tx);

        if let Err(e) = self
            .send(&ControlRequest::ExecStream { id, command, cwd })
            .await
        {
            self.pending.lock().await.streams.remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Ask the host to exit, then make sure it is gone.
    pub async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.send(&ControlRequest::Exit).await;

        let mut child = self.child.lock().await;
        match timeout(Duration::from_millis(500), child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                debug!(session = %self.session_id, "session host ignored exit, killing");
                let _ = child.kill().await;
            }
        }
        self.pending.lock().await.fail_all("session terminated");
    }
}

/// Reader task: parse reply lines, dispatch by correlation id.
fn spawn_reader(
    session_id: String,
    stdout: tokio::process::ChildStdout,
    pending: Arc<Mutex<PendingMap>>,
    alive: Arc<AtomicBool>,
    ready_tx: oneshot::Sender<()>,
) {
    tokio::spawn(async move {
        let mut ready_tx = Some(ready_tx);
        let mut reader = BufReader::new(stdout);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(session = %session_id, error = %e, "control stdout read error");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let reply: ControlReply = match serde_json::from_str(trimmed) {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(session = %session_id, error = %e, line = %trimmed, "unparseable control reply");
                    continue;
                }
            };

            match reply {
                ControlReply::Ready => {
                    if let Some(tx) = ready_tx.take() {
                        let _ = tx.send(());
                    }
                }
                ControlReply::Result {
                    id,
                    stdout,
                    stderr,
                    exit_code,
                } => {
                    if let Some(tx) = pending.lock().await.unary.remove(&id) {
                        let _ = tx.send(Ok(RawResult {
                            stdout,
                            stderr,
                            exit_code,
                        }));
                    } else {
                        debug!(session = %session_id, %id, "late result for dead correlation");
                    }
                }
                ControlReply::Error { id, error } => {
                    if let Some(tx) = pending.lock().await.unary.remove(&id) {
                        let _ = tx.send(Err(classify_host_error(&error)));
                    } else if let Some(tx) = pending.lock().await.streams.remove(&id) {
                        let _ = tx.send(ExecEvent::Error { message: error }).await;
                    }
                }
                ControlReply::StreamEvent { id, event } => {
                    let terminal = event.is_terminal();
                    let route = pending.lock().await.streams.get(&id).cloned();
                    match route {
                        Some(tx) => {
                            // A closed channel means the consumer cancelled;
                            // drop the route and keep discarding.
                            if tx.send(event).await.is_err() || terminal {
                                pending.lock().await.streams.remove(&id);
                            }
                        }
                        None => debug!(session = %session_id, %id, "stream event for dead correlation"),
                    }
                }
            }
        }

        // Child exit (graceful or crash) rejects everything in flight.
        alive.store(false, Ordering::SeqCst);
        pending.lock().await.fail_all("session terminated");
        debug!(session = %session_id, "control reader exiting");
    });
}

/// Host-side error strings that map onto structured errors.
fn classify_host_error(error: &str) -> SandboxError {
    let timeout_ms = error
        .strip_prefix("command timed out after ")
        .and_then(|rest| rest.strip_suffix("ms"))
        .and_then(|n| n.parse().ok());
    match timeout_ms {
        Some(ms) => SandboxError::Timeout(ms),
        None => SandboxError::Internal(error.to_string()),
    }
}

/// Re-log the host's stderr through the daemon's tracing output.
fn spawn_stderr_drain(session_id: String, stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf: Vec<u8> = Vec::with_capacity(1024);
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end();
                    if !line.is_empty() {
                        debug!(session = %session_id, "host: {line}");
                    }
                }
            }
        }
    });
}
