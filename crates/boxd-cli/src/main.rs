//! The `boxd` binary.
//!
//! One executable, two modes: the daemon (default), and the session host
//! the daemon re-executes for each session (`BOXD_SESSION_HOST=1`). Host
//! mode must never write logs to stdout — that pipe carries the control
//! protocol — so the subscriber is pinned to stderr for both modes.

use anyhow::{Context, Result};
use boxd_core::Config;
use boxd_core::config::env_keys;
use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "boxd", about = "In-container sandbox control-plane daemon", version)]
struct Args {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3000, env = "BOXD_PORT")]
    port: u16,

    /// Workspace directory used as the default working directory.
    #[arg(long, default_value = "/workspace")]
    workspace: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if std::env::var(env_keys::SESSION_HOST).is_ok() {
        boxd_session::host::run()
            .await
            .context("session host failed")?;
        return Ok(());
    }

    let args = Args::parse();
    let config = Config::from_env().with_workspace_dir(args.workspace.clone());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.host, args.port))?;

    let state = boxd_axum::build_state(config, args.port);
    boxd_axum::serve(state, addr).await
}
