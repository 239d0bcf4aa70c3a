//! Session host: the control child's side of the wire.
//!
//! The daemon re-executes its own binary with `BOXD_SESSION_HOST=1`; the
//! binary routes into [`run`], which owns the interactive shell and serves
//! the line-JSON control protocol on stdin/stdout. All logging goes to
//! stderr — stdout belongs to the protocol.

pub mod cleanup;
pub mod isolation;
mod runner;
mod shell;

use crate::protocol::{ControlReply, ControlRequest, encode_line};
use boxd_core::config::env_keys;
use boxd_core::{Config, ExecEvent};
use runner::CommandRunner;
use shell::SessionShell;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Entry point for session-host mode. Returns when asked to exit or when
/// the control pipe or shell goes away.
pub async fn run() -> io::Result<()> {
    let config = Config::from_env();
    let session_id =
        std::env::var(env_keys::SESSION_ID).unwrap_or_else(|_| "default".to_string());
    let cwd = std::env::var(env_keys::SESSION_CWD)
        .map(PathBuf::from)
        .unwrap_or_else(|_| config.workspace_dir.clone());
    let isolated = std::env::var(env_keys::SESSION_ISOLATED).as_deref() == Ok("1");
    // The daemon probed capability once at startup and hands the result
    // down; probing falls back only when the host is run standalone.
    let namespaces = match std::env::var(env_keys::NAMESPACES_AVAILABLE).as_deref() {
        Ok(value) => value == "1",
        Err(_) => isolation::namespaces_available().await,
    };
    if isolated && !namespaces {
        info!("isolation requested but namespaces are unavailable, running unisolated");
    }

    let shell = SessionShell::spawn(isolated && namespaces, &cwd).await?;
    info!(session = %session_id, isolated = isolated && namespaces, "session host up");

    let mut runner = CommandRunner::new(shell, config.temp_dir.clone(), config.command_timeout);
    let reaper = cleanup::spawn_reaper(
        config.temp_dir.clone(),
        config.cleanup_interval,
        config.temp_file_max_age,
    );

    let writer: Arc<Mutex<Stdout>> = Arc::new(Mutex::new(tokio::io::stdout()));
    write_reply(&writer, &ControlReply::Ready).await?;

    let mut requests = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = requests.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let request: ControlRequest = match serde_json::from_str(trimmed) {
            Ok(req) => req,
            Err(e) => {
                warn!(session = %session_id, error = %e, "unparseable control request");
                continue;
            }
        };

        match request {
            ControlRequest::Exec { id, command, cwd } => {
                let reply = match runner.exec(id, &command, cwd.as_deref()).await {
                    Ok(raw) => ControlReply::Result {
                        id,
                        stdout: raw.stdout,
                        stderr: raw.stderr,
                        exit_code: raw.exit_code,
                    },
                    Err(e) => ControlReply::Error {
                        id,
                        error: e.to_string(),
                    },
                };
                write_reply(&writer, &reply).await?;
            }
            ControlRequest::ExecStream { id, command, cwd } => {
                stream_exec(&mut runner, &writer, id, &command, cwd.as_deref()).await?;
            }
            ControlRequest::Exit => {
                debug!(session = %session_id, "exit requested");
                break;
            }
        }

        if !runner.shell_alive() {
            warn!(session = %session_id, "shell exited, terminating host");
            break;
        }
    }

    reaper.abort();
    runner.kill_shell().await;
    Ok(())
}

/// Run one streaming exec, forwarding every event as a `stream_event` line.
async fn stream_exec(
    runner: &mut CommandRunner,
    writer: &Arc<Mutex<Stdout>>,
    id: Uuid,
    command: &str,
    cwd: Option<&str>,
) -> io::Result<()> {
    let (tx, mut rx) = mpsc::channel::<ExecEvent>(64);

    let forward_writer = Arc::clone(writer);
    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let reply = ControlReply::StreamEvent { id, event };
            if write_reply(&forward_writer, &reply).await.is_err() {
                break;
            }
        }
    });

    // The runner reports failures through the event channel too; the Err
    // here only matters for deciding whether the host can keep going.
    let _ = runner.exec_streaming(id, command, cwd, tx).await;
    let _ = forwarder.await;
    Ok(())
}

async fn write_reply(writer: &Arc<Mutex<Stdout>>, reply: &ControlReply) -> io::Result<()> {
    let line = encode_line(reply).map_err(io::Error::other)?;
    let mut out = writer.lock().await;
    out.write_all(line.as_bytes()).await?;
    out.flush().await
}
