//! File-based command execution inside the session shell.
//!
//! The command text is written to a script file and sourced by the shell
//! with stdout/stderr redirected into transport files; the exit-code file
//! doubles as the completion sentinel and is written last. Marker parsing
//! in the output stream would break on binary output or embedded markers;
//! files do not.

use super::shell::SessionShell;
use boxd_core::ExecEvent;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub(super) enum RunnerError {
    #[error("command timed out after {0}ms")]
    Timeout(u64),
    #[error("shell exited")]
    ShellExited,
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub(super) struct RawExec {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Per-command transport file set, named by correlation id.
struct TransportFiles {
    script: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
    code: PathBuf,
}

impl TransportFiles {
    fn new(temp_dir: &Path, id: Uuid) -> Self {
        let base = temp_dir.join(format!("boxd_cmd_{}", id.simple()));
        Self {
            script: base.with_extension("sh"),
            stdout: base.with_extension("out"),
            stderr: base.with_extension("err"),
            code: base.with_extension("code"),
        }
    }

    async fn remove(&self) {
        for path in [&self.script, &self.stdout, &self.stderr, &self.code] {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

pub(super) struct CommandRunner {
    shell: SessionShell,
    temp_dir: PathBuf,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(shell: SessionShell, temp_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            shell,
            temp_dir,
            timeout,
        }
    }

    pub fn shell_alive(&mut self) -> bool {
        self.shell.is_alive()
    }

    pub async fn kill_shell(&mut self) {
        self.shell.kill().await;
    }

    /// Run one command to completion and collect its output.
    pub async fn exec(
        &mut self,
        id: Uuid,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<RawExec, RunnerError> {
        let files = TransportFiles::new(&self.temp_dir, id);
        self.dispatch(&files, command, cwd).await?;

        let waited = self.wait_for_sentinel(&files).await;
        let result = match waited {
            Ok(()) => {
                let stdout = read_lossy(&files.stdout).await;
                let stderr = read_lossy(&files.stderr).await;
                let exit_code = read_exit_code(&files.code).await;
                Ok(RawExec {
                    stdout,
                    stderr,
                    exit_code,
                })
            }
            Err(e) => Err(e),
        };
        files.remove().await;
        result
    }

    /// Run one command, emitting events as output lands in the transport
    /// files. All events, the terminal one included, go through `events`.
    pub async fn exec_streaming(
        &mut self,
        id: Uuid,
        command: &str,
        cwd: Option<&str>,
        events: mpsc::Sender<ExecEvent>,
    ) -> Result<(), RunnerError> {
        let files = TransportFiles::new(&self.temp_dir, id);
        let _ = events
            .send(ExecEvent::Start {
                command: command.to_string(),
            })
            .await;

        if let Err(e) = self.dispatch(&files, command, cwd).await {
            let _ = events
                .send(ExecEvent::Error {
                    message: e.to_string(),
                })
                .await;
            files.remove().await;
            return Err(e);
        }

        let mut out_tail = FileTail::new(files.stdout.clone());
        let mut err_tail = FileTail::new(files.stderr.clone());
        let deadline = Instant::now() + self.timeout;
        let mut shell_gone = false;

        let outcome = loop {
            // Drain in read order; stdout before stderr within a cycle.
            if let Some(data) = out_tail.read_new().await? {
                let _ = events.send(ExecEvent::Stdout { data }).await;
            }
            if let Some(data) = err_tail.read_new().await? {
                let _ = events.send(ExecEvent::Stderr { data }).await;
            }

            if sentinel_present(&files.code).await {
                // Final drain so trailing output precedes the terminal event.
                if let Some(data) = out_tail.finish().await? {
                    let _ = events.send(ExecEvent::Stdout { data }).await;
                }
                if let Some(data) = err_tail.finish().await? {
                    let _ = events.send(ExecEvent::Stderr { data }).await;
                }
                let exit_code = read_exit_code(&files.code).await;
                let _ = events.send(ExecEvent::Complete { exit_code }).await;
                break Ok(());
            }

            if shell_gone {
                let _ = events
                    .send(ExecEvent::Error {
                        message: "shell exited".into(),
                    })
                    .await;
                break Err(RunnerError::ShellExited);
            }
            // One more poll after shell death catches a sentinel written
            // right before the exit.
            shell_gone = !self.shell.is_alive();

            if Instant::now() >= deadline {
                let message =
                    RunnerError::Timeout(self.timeout.as_millis() as u64).to_string();
                let _ = events.send(ExecEvent::Error { message }).await;
                break Err(RunnerError::Timeout(self.timeout.as_millis() as u64));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        };

        files.remove().await;
        outcome
    }

    /// Write the script file and hand the shell its run snippet.
    async fn dispatch(
        &mut self,
        files: &TransportFiles,
        command: &str,
        cwd: Option<&str>,
    ) -> Result<(), RunnerError> {
        if !self.shell.is_alive() {
            return Err(RunnerError::ShellExited);
        }

        // The raw command never touches the control pipe: arbitrary text,
        // unbalanced quotes and multi-line scripts all go through the file.
        let mut script = command.to_string();
        if !script.ends_with('\n') {
            script.push('\n');
        }
        tokio::fs::write(&files.script, script).await?;

        let q = |p: &Path| quote(&p.to_string_lossy());
        // Sourcing keeps cd/export effects in the shell so session state
        // persists across calls; an explicit per-call cwd runs in a subshell
        // so the override does not leak.
        let snippet = match cwd {
            Some(dir) => format!(
                "( cd {} && . {} ) > {} 2> {}\nprintf '%s' \"$?\" > {}\n",
                quote(dir),
                q(&files.script),
                q(&files.stdout),
                q(&files.stderr),
                q(&files.code),
            ),
            None => format!(
                ". {} > {} 2> {}\nprintf '%s' \"$?\" > {}\n",
                q(&files.script),
                q(&files.stdout),
                q(&files.stderr),
                q(&files.code),
            ),
        };
        self.shell.send(&snippet).await?;
        Ok(())
    }

    async fn wait_for_sentinel(&mut self, files: &TransportFiles) -> Result<(), RunnerError> {
        let deadline = Instant::now() + self.timeout;
        let mut shell_gone = false;
        loop {
            if sentinel_present(&files.code).await {
                return Ok(());
            }
            if shell_gone {
                return Err(RunnerError::ShellExited);
            }
            shell_gone = !self.shell.is_alive();
            if Instant::now() >= deadline {
                return Err(RunnerError::Timeout(self.timeout.as_millis() as u64));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", s.replace('\'', r"'\''")))
}

/// The exit-code file is written last; its presence (non-empty) means the
/// command finished and stdout/stderr are complete on disk.
async fn sentinel_present(code: &Path) -> bool {
    matches!(tokio::fs::metadata(code).await, Ok(meta) if meta.len() > 0)
}

async fn read_exit_code(code: &Path) -> i32 {
    match tokio::fs::read_to_string(code).await {
        Ok(raw) => raw.trim().parse().unwrap_or(-1),
        Err(_) => -1,
    }
}

async fn read_lossy(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Incremental reader over a transport file that is being appended to.
///
/// Keeps the open handle (and thus the read position) across polls and
/// holds back incomplete trailing UTF-8 sequences so emitted chunks are
/// always valid text.
struct FileTail {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    carry: Vec<u8>,
}

impl FileTail {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            file: None,
            carry: Vec::new(),
        }
    }

    /// Read whatever was appended since the last call.
    async fn read_new(&mut self) -> io::Result<Option<String>> {
        if self.file.is_none() {
            // The shell creates the file when the redirection opens; until
            // then there is nothing to read.
            match tokio::fs::File::open(&self.path).await {
                Ok(f) => self.file = Some(f),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        let file = self.file.as_mut().unwrap();
        let mut fresh = Vec::new();
        file.read_to_end(&mut fresh).await?;
        if fresh.is_empty() && self.carry.is_empty() {
            return Ok(None);
        }

        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(&fresh);
        let split = utf8_boundary(&bytes);
        self.carry = bytes.split_off(split);
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Final drain; flushes any held-back bytes lossily.
    async fn finish(&mut self) -> io::Result<Option<String>> {
        let mut out = self.read_new().await?.unwrap_or_default();
        if !self.carry.is_empty() {
            out.push_str(&String::from_utf8_lossy(&self.carry));
            self.carry.clear();
        }
        Ok(if out.is_empty() { None } else { Some(out) })
    }
}

/// Largest prefix length of `bytes` that does not end mid-UTF-8-sequence.
fn utf8_boundary(bytes: &[u8]) -> usize {
    // A sequence is at most 4 bytes; only the tail can be incomplete.
    let tail_start = bytes.len().saturating_sub(3);
    for i in (tail_start..bytes.len()).rev() {
        let b = bytes[i];
        if b < 0x80 {
            return i + 1;
        }
        if b >= 0xC0 {
            // Lead byte: complete iff the full sequence is present.
            let needed = if b >= 0xF0 {
                4
            } else if b >= 0xE0 {
                3
            } else {
                2
            };
            return if bytes.len() - i >= needed {
                bytes.len()
            } else {
                i
            };
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_handles_spaces_and_quotes() {
        assert_eq!(quote("plain"), "plain");
        assert_eq!(quote("with space"), "'with space'");
        assert!(quote("it's").contains("it"));
    }

    #[test]
    fn utf8_boundary_plain_ascii() {
        assert_eq!(utf8_boundary(b"hello"), 5);
        assert_eq!(utf8_boundary(b""), 0);
    }

    #[test]
    fn utf8_boundary_holds_back_partial_sequences() {
        let snowman = "☃".as_bytes(); // 3 bytes
        assert_eq!(utf8_boundary(snowman), 3);
        assert_eq!(utf8_boundary(&snowman[..2]), 0);

        let mut mixed = b"ab".to_vec();
        mixed.extend_from_slice(&snowman[..1]);
        assert_eq!(utf8_boundary(&mixed), 2);
    }

    #[test]
    fn utf8_boundary_continuation_only_tail() {
        // 4-byte emoji split after 2 bytes, preceded by ascii
        let crab = "🦀".as_bytes();
        let mut buf = b"x".to_vec();
        buf.extend_from_slice(&crab[..2]);
        assert_eq!(utf8_boundary(&buf), 1);
        let mut full = b"x".to_vec();
        full.extend_from_slice(crab);
        assert_eq!(utf8_boundary(&full), 5);
    }

    #[test]
    fn transport_files_share_correlation_base() {
        let id = Uuid::new_v4();
        let files = TransportFiles::new(Path::new("/tmp"), id);
        let base = format!("boxd_cmd_{}", id.simple());
        for path in [&files.script, &files.stdout, &files.stderr, &files.code] {
            assert!(path.file_name().unwrap().to_string_lossy().starts_with(&base));
        }
    }

    #[cfg(unix)]
    mod live_shell {
        use super::super::super::shell::SessionShell;
        use super::*;
        use std::time::Duration;

        async fn runner(timeout: Duration) -> (CommandRunner, tempfile::TempDir) {
            let dir = tempfile::tempdir().unwrap();
            let shell = SessionShell::spawn(false, dir.path()).await.unwrap();
            (
                CommandRunner::new(shell, dir.path().to_path_buf(), timeout),
                dir,
            )
        }

        #[tokio::test]
        async fn exec_round_trip() {
            let (mut runner, _dir) = runner(Duration::from_secs(10)).await;
            let raw = runner
                .exec(Uuid::new_v4(), "echo hello", None)
                .await
                .unwrap();
            assert_eq!(raw.stdout, "hello\n");
            assert_eq!(raw.stderr, "");
            assert_eq!(raw.exit_code, 0);
            runner.kill_shell().await;
        }

        #[tokio::test]
        async fn exec_reports_nonzero_exit_codes() {
            let (mut runner, _dir) = runner(Duration::from_secs(10)).await;
            let raw = runner.exec(Uuid::new_v4(), "exit 3", None).await.unwrap();
            assert_eq!(raw.exit_code, 3);
            runner.kill_shell().await;
        }

        #[tokio::test]
        async fn shell_state_persists_across_execs() {
            let (mut runner, _dir) = runner(Duration::from_secs(10)).await;

            runner
                .exec(Uuid::new_v4(), "cd / && export BOXD_PROBE=42", None)
                .await
                .unwrap();
            let raw = runner
                .exec(Uuid::new_v4(), "pwd; echo $BOXD_PROBE", None)
                .await
                .unwrap();
            assert_eq!(raw.stdout, "/\n42\n");
            runner.kill_shell().await;
        }

        #[tokio::test]
        async fn per_call_cwd_does_not_leak() {
            let (mut runner, dir) = runner(Duration::from_secs(10)).await;

            let raw = runner
                .exec(Uuid::new_v4(), "pwd", Some("/"))
                .await
                .unwrap();
            assert_eq!(raw.stdout, "/\n");

            let raw = runner.exec(Uuid::new_v4(), "pwd", None).await.unwrap();
            let session_cwd = dir.path().canonicalize().unwrap();
            assert_eq!(raw.stdout.trim(), session_cwd.to_string_lossy());
            runner.kill_shell().await;
        }

        #[tokio::test]
        async fn binary_safe_output_survives() {
            let (mut runner, _dir) = runner(Duration::from_secs(10)).await;
            // NUL bytes and a fake completion marker in the output stream.
            let raw = runner
                .exec(Uuid::new_v4(), r"printf 'a\0b'; echo; echo DONE", None)
                .await
                .unwrap();
            assert!(raw.stdout.contains("DONE"));
            assert_eq!(raw.exit_code, 0);
            runner.kill_shell().await;
        }

        #[tokio::test]
        async fn exec_times_out() {
            let (mut runner, _dir) = runner(Duration::from_millis(300)).await;
            let err = runner
                .exec(Uuid::new_v4(), "sleep 5", None)
                .await
                .unwrap_err();
            assert!(matches!(err, RunnerError::Timeout(300)));
            runner.kill_shell().await;
        }

        #[tokio::test]
        async fn streaming_emits_ordered_events() {
            let (mut runner, _dir) = runner(Duration::from_secs(10)).await;
            let (tx, mut rx) = mpsc::channel(64);

            runner
                .exec_streaming(
                    Uuid::new_v4(),
                    "printf one; printf two 1>&2",
                    None,
                    tx,
                )
                .await
                .unwrap();
            runner.kill_shell().await;

            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }

            assert!(matches!(events.first(), Some(ExecEvent::Start { .. })));
            assert!(matches!(events.last(), Some(ExecEvent::Complete { exit_code: 0 })));

            let stdout: String = events
                .iter()
                .filter_map(|e| match e {
                    ExecEvent::Stdout { data } => Some(data.as_str()),
                    _ => None,
                })
                .collect();
            let stderr: String = events
                .iter()
                .filter_map(|e| match e {
                    ExecEvent::Stderr { data } => Some(data.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(stdout, "one");
            assert_eq!(stderr, "two");
        }
    }
}
