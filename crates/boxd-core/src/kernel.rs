//! Kernel port traits.
//!
//! The interpreter pool is written against these traits so the pool logic
//! never depends on how a kernel process is launched or what its wire
//! format looks like.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Which output stream a kernel `stream` message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStream {
    Stdout,
    Stderr,
}

/// One inbound message from a kernel during code execution.
///
/// This is the interface-level shape of the kernel's publish channel; the
/// concrete wire format lives behind the `KernelConnection` impl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelMessage {
    Stream {
        stream: KernelStream,
        text: String,
    },
    DisplayData {
        data: Value,
    },
    ExecuteResult {
        data: Value,
        execution_count: u64,
    },
    Error {
        ename: String,
        evalue: String,
        traceback: Vec<String>,
    },
    /// The reply closing one execution. `ok == false` when the execution
    /// raised; the error details arrive as a separate `Error` message.
    ExecuteReply {
        ok: bool,
        execution_count: u64,
    },
}

impl KernelMessage {
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::ExecuteReply { .. })
    }
}

/// A live conversation with one language kernel.
#[async_trait]
pub trait KernelConnection: Send + Sync {
    /// Submit code and receive the kernel's messages for this execution in
    /// emission order. The channel closes after the `ExecuteReply`.
    async fn execute(&self, code: &str) -> Result<mpsc::Receiver<KernelMessage>>;

    /// Ask the kernel to shut down and reap the underlying process.
    async fn shutdown(&self) -> Result<()>;

    /// Whether the kernel process is still believed to be alive.
    fn is_alive(&self) -> bool;
}

/// Launches kernels for the pool.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn launch(
        &self,
        language: &str,
        cwd: &Path,
        env: &[(String, String)],
    ) -> Result<Arc<dyn KernelConnection>>;
}
