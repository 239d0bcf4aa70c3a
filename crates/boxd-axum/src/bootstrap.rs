//! Composition root: build the shared state, serve, tear down.

use crate::routes::create_router;
use crate::state::{AppState, ServerContext};
use anyhow::{Context as _, Result};
use boxd_core::Config;
use boxd_interp::kernel::ProcessKernelLauncher;
use boxd_interp::{InterpreterConfig, InterpreterService, KernelManager};
use boxd_proxy::PortRegistry;
use boxd_session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::info;

/// Assemble every component. Kernel warm-up is NOT started here; `serve`
/// spawns it so the HTTP surface is up immediately (interpreter routes
/// 503 until ready) and tests can drive a cold state.
pub fn build_state(config: Config, daemon_port: u16) -> AppState {
    let config = Arc::new(config);

    let launcher = Arc::new(ProcessKernelLauncher::new(config.temp_dir.clone()));
    let manager = Arc::new(KernelManager::new(launcher));
    let interp = InterpreterService::new(
        InterpreterConfig {
            workspace_dir: config.workspace_dir.clone(),
            ..InterpreterConfig::default()
        },
        manager,
    );

    Arc::new(ServerContext {
        sessions: Arc::new(SessionRegistry::new(Arc::clone(&config))),
        ports: Arc::new(PortRegistry::new(daemon_port)),
        interp,
        http: reqwest::Client::new(),
        started_at: Instant::now(),
        shutdown: Arc::new(Notify::new()),
        config,
    })
}

/// Serve until ctrl-c or `/api/shutdown`, then reclaim every child process
/// and temp file.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    // One-time namespace capability probe; sessions created later reuse
    // the cached result and hand it down to their control children.
    let namespaces = boxd_session::host::isolation::namespaces_available().await;
    info!(available = namespaces, "namespace isolation capability");

    {
        let interp = Arc::clone(&state.interp);
        tokio::spawn(async move {
            interp.initialize().await;
        });
    }

    let shutdown: Arc<Notify> = Arc::clone(&state.shutdown);
    let router = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "boxd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown.notified() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
            info!("shutting down");
        })
        .await
        .context("server error")?;

    state.sessions.destroy_all().await;
    state.interp.shutdown_all().await;
    info!("shutdown complete");
    Ok(())
}
