//! One background process and its capture state.

use boxd_core::{ProcessInfo, ProcessLogs, ProcessStatus, ProcessStreamEvent};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Mutable state, guarded by a sync mutex held only for short sections.
pub(crate) struct RecordState {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    /// Cached capture text; grows monotonically until terminal.
    pub stdout: String,
    pub stderr: String,
}

pub(crate) struct ProcessRecord {
    pub id: String,
    pub command: String,
    pub session_id: String,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    /// Sidecar the launch wrapper writes the exit code into.
    pub code_path: PathBuf,
    pub auto_cleanup: bool,
    state: Mutex<RecordState>,
    events: broadcast::Sender<ProcessStreamEvent>,
    pub(crate) monitor: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessRecord {
    pub fn new(
        id: String,
        command: String,
        session_id: String,
        temp_dir: &Path,
        auto_cleanup: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            stdout_path: temp_dir.join(format!("proc_{id}.stdout")),
            stderr_path: temp_dir.join(format!("proc_{id}.stderr")),
            code_path: temp_dir.join(format!("proc_{id}.code")),
            id,
            command,
            session_id,
            auto_cleanup,
            state: Mutex::new(RecordState {
                status: ProcessStatus::Starting,
                pid: None,
                started_at: Utc::now(),
                ended_at: None,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            }),
            events,
            monitor: Mutex::new(None),
        }
    }

    pub fn info(&self) -> ProcessInfo {
        let state = self.state.lock().unwrap();
        ProcessInfo {
            id: self.id.clone(),
            command: self.command.clone(),
            session_id: self.session_id.clone(),
            status: state.status,
            pid: state.pid,
            started_at: state.started_at,
            ended_at: state.ended_at,
            exit_code: state.exit_code,
        }
    }

    pub fn logs(&self) -> ProcessLogs {
        let state = self.state.lock().unwrap();
        ProcessLogs {
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.state.lock().unwrap().status
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.lock().unwrap().pid
    }

    pub fn set_running(&self, pid: u32) {
        let mut state = self.state.lock().unwrap();
        state.pid = Some(pid);
        state.status = ProcessStatus::Running;
    }

    pub fn set_start_error(&self, stderr: String) {
        let mut state = self.state.lock().unwrap();
        state.status = ProcessStatus::Error;
        state.ended_at = Some(Utc::now());
        state.stderr = stderr;
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Subscribe and snapshot atomically.
    ///
    /// Holding the state lock across both steps (delta publication happens
    /// under the same lock) guarantees a subscriber sees each byte exactly
    /// once: first in the snapshot or later as a delta, never both.
    pub fn subscribe(
        &self,
    ) -> (
        ProcessLogs,
        Option<(ProcessStatus, Option<i32>)>,
        broadcast::Receiver<ProcessStreamEvent>,
    ) {
        let state = self.state.lock().unwrap();
        let rx = self.events.subscribe();
        let snapshot = ProcessLogs {
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
        };
        let terminal = state
            .status
            .is_terminal()
            .then_some((state.status, state.exit_code));
        (snapshot, terminal, rx)
    }

    /// Fold freshly read capture file contents into the cache, publishing
    /// the new suffixes. Contents shorter than the cache are ignored (the
    /// files only ever grow).
    pub fn extend_from_captures(&self, stdout: &str, stderr: &str) {
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return;
        }
        if stdout.len() > state.stdout.len() {
            let delta = stdout[state.stdout.len()..].to_string();
            state.stdout.push_str(&delta);
            let _ = self.events.send(ProcessStreamEvent::Stdout { data: delta });
        }
        if stderr.len() > state.stderr.len() {
            let delta = stderr[state.stderr.len()..].to_string();
            state.stderr.push_str(&delta);
            let _ = self.events.send(ProcessStreamEvent::Stderr { data: delta });
        }
    }

    /// One-way transition into a terminal status; notifies subscribers
    /// exactly once. Returns whether this call performed the transition.
    pub fn mark_terminal(&self, status: ProcessStatus, exit_code: Option<i32>) -> bool {
        debug_assert!(status.is_terminal());
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.exit_code = exit_code;
        state.ended_at = Some(Utc::now());
        let _ = self.events.send(ProcessStreamEvent::Complete {
            status,
            exit_code,
        });
        debug!(process = %self.id, %status, ?exit_code, "process finished");
        true
    }

    /// Read the capture files and fold any growth into the cache.
    pub async fn refresh_from_files(&self) {
        let stdout = read_capture(&self.stdout_path).await;
        let stderr = read_capture(&self.stderr_path).await;
        self.extend_from_captures(&stdout, &stderr);
    }

    /// Exit code from the launch wrapper's sidecar, when it got to write one.
    pub async fn read_exit_code(&self) -> Option<i32> {
        let raw = tokio::fs::read_to_string(&self.code_path).await.ok()?;
        raw.trim().parse().ok()
    }

    /// Delete capture files; called once the record is terminal.
    pub async fn remove_capture_files(&self) {
        for path in [&self.stdout_path, &self.stderr_path, &self.code_path] {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

async fn read_capture(path: &Path) -> String {
    match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProcessRecord {
        ProcessRecord::new(
            "abc123".into(),
            "sleep 1".into(),
            "default".into(),
            Path::new("/tmp"),
            true,
        )
    }

    #[test]
    fn capture_paths_follow_convention() {
        let r = record();
        assert_eq!(r.stdout_path, PathBuf::from("/tmp/proc_abc123.stdout"));
        assert_eq!(r.stderr_path, PathBuf::from("/tmp/proc_abc123.stderr"));
    }

    #[test]
    fn deltas_are_strict_suffixes() {
        let r = record();
        r.set_running(4242);
        let (snapshot, terminal, mut rx) = r.subscribe();
        assert!(snapshot.stdout.is_empty());
        assert!(terminal.is_none());

        r.extend_from_captures("one\n", "");
        r.extend_from_captures("one\ntwo\n", "");
        // A stale (shorter) read must not rewind the cache.
        r.extend_from_captures("one\n", "");

        assert_eq!(
            rx.try_recv().unwrap(),
            ProcessStreamEvent::Stdout { data: "one\n".into() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProcessStreamEvent::Stdout { data: "two\n".into() }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(r.logs().stdout, "one\ntwo\n");
    }

    #[test]
    fn terminal_transition_is_one_way_and_notifies_once() {
        let r = record();
        r.set_running(4242);
        let (_, _, mut rx) = r.subscribe();

        assert!(r.mark_terminal(ProcessStatus::Completed, Some(0)));
        assert!(!r.mark_terminal(ProcessStatus::Killed, None));
        assert_eq!(r.status(), ProcessStatus::Completed);

        // Growth after terminal is discarded.
        r.extend_from_captures("late\n", "");

        assert_eq!(
            rx.try_recv().unwrap(),
            ProcessStreamEvent::Complete {
                status: ProcessStatus::Completed,
                exit_code: Some(0),
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscribe_after_terminal_reports_status() {
        let r = record();
        r.set_running(1);
        r.mark_terminal(ProcessStatus::Failed, Some(2));
        let (_, terminal, _) = r.subscribe();
        assert_eq!(terminal, Some((ProcessStatus::Failed, Some(2))));
    }
}
