//! The session's interactive shell.
//!
//! One long-lived `bash` per host, fed command snippets on stdin. When
//! `isolate` is set the shell runs inside fresh PID + mount namespaces
//! (via `unshare --fork --pid --mount-proc`) with /proc remounted, so user
//! commands cannot see the control-plane processes. Whether isolation is
//! possible was decided by the daemon's one-time capability probe; the
//! host just obeys.

use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::warn;

pub(super) struct SessionShell {
    child: Child,
    stdin: ChildStdin,
}

impl SessionShell {
    pub async fn spawn(isolate: bool, cwd: &Path) -> io::Result<Self> {
        let cwd = if cwd.is_dir() {
            cwd
        } else {
            warn!(cwd = %cwd.display(), "session cwd does not exist, falling back to /");
            Path::new("/")
        };

        let mut cmd = if isolate {
            let mut c = Command::new("unshare");
            c.args(["--fork", "--pid", "--mount-proc", "bash"]);
            c
        } else {
            Command::new("bash")
        };

        // The shell's stdout must never reach the host's stdout: that pipe
        // carries the control protocol. All command output goes through the
        // transport files; anything stray is dropped.
        let mut child = cmd
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("shell has no stdin"))?;

        Ok(Self { child, stdin })
    }

    /// Feed a snippet to the shell.
    pub async fn send(&mut self, snippet: &str) -> io::Result<()> {
        self.stdin.write_all(snippet.as_bytes()).await?;
        self.stdin.flush().await
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}
