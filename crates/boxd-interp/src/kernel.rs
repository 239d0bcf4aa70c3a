//! Stdio kernel client and process launcher.
//!
//! A kernel is a child process speaking line-delimited JSON: one execute
//! request in, a sequence of publish messages out, closed by an
//! `execute_reply`. Messages are routed to per-execution channels by id.

use async_trait::async_trait;
use boxd_core::kernel::{KernelConnection, KernelLauncher, KernelMessage, KernelStream};
use boxd_core::{Result, SandboxError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, OnceCell, mpsc};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Embedded Python kernel shim; written to the temp dir at first launch.
const PYTHON_KERNEL: &str = include_str!("../kernels/python_kernel.py");

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum KernelRequest<'a> {
    Execute { id: &'a str, code: &'a str },
    Shutdown,
}

/// Inbound kernel wire messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum KernelWire {
    Stream {
        id: String,
        stream: KernelStream,
        text: String,
    },
    DisplayData {
        id: String,
        data: Value,
    },
    ExecuteResult {
        id: String,
        data: Value,
        execution_count: u64,
    },
    Error {
        id: String,
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
    ExecuteReply {
        id: String,
        status: String,
        execution_count: u64,
    },
}

impl KernelWire {
    fn split(self) -> (String, KernelMessage) {
        match self {
            Self::Stream { id, stream, text } => (id, KernelMessage::Stream { stream, text }),
            Self::DisplayData { id, data } => (id, KernelMessage::DisplayData { data }),
            Self::ExecuteResult {
                id,
                data,
                execution_count,
            } => (
                id,
                KernelMessage::ExecuteResult {
                    data,
                    execution_count,
                },
            ),
            Self::Error {
                id,
                ename,
                evalue,
                traceback,
            } => (
                id,
                KernelMessage::Error {
                    ename,
                    evalue,
                    traceback,
                },
            ),
            Self::ExecuteReply {
                id,
                status,
                execution_count,
            } => (
                id,
                KernelMessage::ExecuteReply {
                    ok: status == "ok",
                    execution_count,
                },
            ),
        }
    }
}

type Routes = Arc<Mutex<HashMap<String, mpsc::Sender<KernelMessage>>>>;

/// A kernel process driven over stdio.
pub struct StdioKernel {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    routes: Routes,
    alive: Arc<AtomicBool>,
}

impl StdioKernel {
    /// Spawn a kernel process and wire up its message reader.
    pub async fn spawn(
        command: &[String],
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<Arc<Self>> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SandboxError::Internal("empty kernel command".into()))?;

        let cwd = if cwd.is_dir() { cwd } else { Path::new("/") };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            SandboxError::Internal(format!("failed to spawn kernel '{program}': {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SandboxError::Internal("kernel has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Internal("kernel has no stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Internal("kernel has no stderr".into()))?;

        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        spawn_reader(stdout, Arc::clone(&routes), Arc::clone(&alive));
        spawn_stderr_drain(stderr);

        Ok(Arc::new(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            routes,
            alive,
        }))
    }

    async fn send(&self, request: &KernelRequest<'_>) -> Result<()> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| SandboxError::Internal(format!("encode kernel request: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|_| SandboxError::Internal("kernel connection closed".into()))?;
        stdin
            .flush()
            .await
            .map_err(|_| SandboxError::Internal("kernel connection closed".into()))
    }
}

#[async_trait]
impl KernelConnection for StdioKernel {
    async fn execute(&self, code: &str) -> Result<mpsc::Receiver<KernelMessage>> {
        if !self.is_alive() {
            return Err(SandboxError::Internal("kernel process has exited".into()));
        }
        let id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::channel(256);
        self.routes.lock().await.insert(id.clone(), tx);

        if let Err(e) = self.send(&KernelRequest::Execute { id: &id, code }).await {
            self.routes.lock().await.remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    async fn shutdown(&self) -> Result<()> {
        let _ = self.send(&KernelRequest::Shutdown).await;
        self.alive.store(false, Ordering::SeqCst);

        if let Some(mut child) = self.child.lock().await.take() {
            match timeout(Duration::from_millis(500), child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    debug!("kernel ignored shutdown, killing");
                    let _ = child.kill().await;
                }
            }
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

fn spawn_reader(stdout: tokio::process::ChildStdout, routes: Routes, alive: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let wire: KernelWire = match serde_json::from_str(trimmed) {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(error = %e, line = %trimmed, "unparseable kernel message");
                    continue;
                }
            };

            let is_reply = matches!(wire, KernelWire::ExecuteReply { .. });
            let (id, message) = wire.split();
            let route = routes.lock().await.get(&id).cloned();
            if let Some(tx) = route {
                let _ = tx.send(message).await;
            }
            if is_reply {
                // Reply closes the execution; dropping the sender closes
                // the consumer's channel.
                routes.lock().await.remove(&id);
            }
        }

        // Kernel exit fails every in-flight execution by closing channels.
        alive.store(false, Ordering::SeqCst);
        routes.lock().await.clear();
        debug!("kernel reader exiting");
    });
}

fn spawn_stderr_drain(stderr: tokio::process::ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                debug!("kernel: {line}");
            }
        }
    });
}

/// Launches kernel processes, resolving per-language commands.
///
/// A language's command comes from `KERNEL_CMD_<LANG>` when set (split
/// shell-style); Python falls back to the embedded shim run with
/// `python3 -u`.
pub struct ProcessKernelLauncher {
    temp_dir: PathBuf,
    python_shim: OnceCell<PathBuf>,
}

impl ProcessKernelLauncher {
    pub fn new(temp_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            python_shim: OnceCell::new(),
        }
    }

    async fn resolve_command(&self, language: &str) -> Result<Vec<String>> {
        let key = format!(
            "KERNEL_CMD_{}",
            language.to_uppercase().replace(['-', '.'], "_")
        );
        if let Ok(raw) = std::env::var(&key) {
            return shlex::split(&raw).filter(|cmd| !cmd.is_empty()).ok_or_else(|| {
                SandboxError::Validation(format!("unparseable kernel command in {key}"))
            });
        }

        if language == "python" {
            let shim = self
                .python_shim
                .get_or_try_init(|| async {
                    let path = self.temp_dir.join("boxd_kernel_python.py");
                    tokio::fs::write(&path, PYTHON_KERNEL).await.map(|()| path)
                })
                .await
                .map_err(|e| {
                    SandboxError::Internal(format!("failed to install python kernel shim: {e}"))
                })?;
            return Ok(vec![
                "python3".to_string(),
                "-u".to_string(),
                shim.to_string_lossy().into_owned(),
            ]);
        }

        Err(SandboxError::Validation(format!(
            "no kernel configured for language: {language}"
        )))
    }
}

#[async_trait]
impl KernelLauncher for ProcessKernelLauncher {
    async fn launch(
        &self,
        language: &str,
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<Arc<dyn KernelConnection>> {
        let command = self.resolve_command(language).await?;
        let kernel = StdioKernel::spawn(&command, cwd, env).await?;
        Ok(kernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_message_parsing() {
        let wire: KernelWire = serde_json::from_str(
            r#"{"op":"stream","id":"e1","stream":"stdout","text":"hi\n"}"#,
        )
        .unwrap();
        let (id, message) = wire.split();
        assert_eq!(id, "e1");
        assert_eq!(
            message,
            KernelMessage::Stream {
                stream: KernelStream::Stdout,
                text: "hi\n".into()
            }
        );

        let wire: KernelWire = serde_json::from_str(
            r#"{"op":"execute_reply","id":"e1","status":"ok","execution_count":4}"#,
        )
        .unwrap();
        let (_, message) = wire.split();
        assert_eq!(
            message,
            KernelMessage::ExecuteReply {
                ok: true,
                execution_count: 4
            }
        );
    }

    #[test]
    fn error_traceback_defaults_to_empty() {
        let wire: KernelWire = serde_json::from_str(
            r#"{"op":"error","id":"e2","ename":"ValueError","evalue":"bad"}"#,
        )
        .unwrap();
        let (_, message) = wire.split();
        match message {
            KernelMessage::Error { traceback, .. } => assert!(traceback.is_empty()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn python_command_uses_embedded_shim() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessKernelLauncher::new(dir.path().to_path_buf());
        let command = launcher.resolve_command("python").await.unwrap();
        assert_eq!(command[0], "python3");
        assert_eq!(command[1], "-u");
        assert!(std::fs::read_to_string(&command[2])
            .unwrap()
            .contains("execute_reply"));
    }

    #[tokio::test]
    async fn unknown_language_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ProcessKernelLauncher::new(dir.path().to_path_buf());
        let err = launcher.resolve_command("cobol").await.unwrap_err();
        assert!(matches!(err, SandboxError::Validation(_)));
    }
}
