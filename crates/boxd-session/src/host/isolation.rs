//! Namespace capability detection.
//!
//! Detected once per daemon lifetime by attempting a no-op unshare; the
//! cached result is threaded down to every session host through the
//! environment, so the probe never re-runs in a control child.

use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::debug;

static NAMESPACES: OnceCell<bool> = OnceCell::const_new();

/// Whether fresh PID + mount namespaces can be created on this kernel.
pub async fn namespaces_available() -> bool {
    *NAMESPACES
        .get_or_init(|| async {
            let probe = Command::new("unshare")
                .args(["--fork", "--pid", "--mount-proc", "true"])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            let available = matches!(probe, Ok(status) if status.success());
            debug!(available, "namespace capability probe");
            available
        })
        .await
}
