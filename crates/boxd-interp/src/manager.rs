//! Kernel manager: launch delegation and the readiness gate.

use boxd_core::kernel::{KernelConnection, KernelLauncher};
use boxd_core::{Result, SandboxError};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use tracing::info;

/// Seconds clients are told to wait before retrying during warm-up.
const RETRY_AFTER_SECS: u64 = 5;

/// Fronts the kernel launcher with readiness tracking.
///
/// Until the initial warm pools are up, every interpreter operation fails
/// with `InterpreterNotReady` carrying a progress percentage; the outer
/// layer turns that into a 503 with `Retry-After`.
pub struct KernelManager {
    launcher: Arc<dyn KernelLauncher>,
    progress: AtomicU8,
    ready: AtomicBool,
}

impl KernelManager {
    pub fn new(launcher: Arc<dyn KernelLauncher>) -> Self {
        Self {
            launcher,
            progress: AtomicU8::new(0),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> u8 {
        if self.is_ready() {
            100
        } else {
            self.progress.load(Ordering::SeqCst)
        }
    }

    pub fn set_progress(&self, progress: u8) {
        self.progress.store(progress.min(99), Ordering::SeqCst);
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
        info!("kernel manager ready");
    }

    /// Gate every interpreter operation on readiness.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(SandboxError::InterpreterNotReady {
                progress: self.progress(),
                retry_after: RETRY_AFTER_SECS,
            })
        }
    }

    pub async fn launch(
        &self,
        language: &str,
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<Arc<dyn KernelConnection>> {
        self.launcher.launch(language, cwd, env).await
    }
}
