//! Background process supervision for one session.
//!
//! Processes are launched detached (`nohup … & echo $!`) through the
//! session shell with their output captured into files; the supervisor
//! tracks records, polls liveness, tails the capture files for subscribers
//! and escalates signals on kill.

mod liveness;
mod monitor;
mod record;

use crate::session::{ExecOptions, Session, require_absolute};
use boxd_core::{
    ProcessInfo, ProcessLogs, ProcessStatus, ProcessStreamEvent, ResourceKind, Result,
    SandboxError,
};
use record::ProcessRecord;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

/// Options for starting a background process.
#[derive(Debug, Clone)]
pub struct StartProcessOptions {
    /// Caller-supplied id; generated when absent.
    pub process_id: Option<String>,
    /// Working directory override; must be absolute.
    pub cwd: Option<String>,
    /// Extra environment for the process.
    pub env: Vec<(String, String)>,
    /// Kill the process if it is still running after this long.
    pub timeout: Option<Duration>,
    /// Delete capture files once the process is terminal.
    pub auto_cleanup: bool,
}

impl Default for StartProcessOptions {
    fn default() -> Self {
        Self {
            process_id: None,
            cwd: None,
            env: Vec::new(),
            timeout: None,
            auto_cleanup: true,
        }
    }
}

/// The background processes of one session.
pub struct ProcessSet {
    session_id: String,
    temp_dir: PathBuf,
    records: RwLock<HashMap<String, Arc<ProcessRecord>>>,
}

impl ProcessSet {
    pub(crate) fn new(session_id: String, temp_dir: PathBuf) -> Self {
        Self {
            session_id,
            temp_dir,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Launch a detached process through the session shell.
    pub async fn start(
        &self,
        session: &Session,
        command: &str,
        opts: StartProcessOptions,
    ) -> Result<ProcessInfo> {
        if command.trim().is_empty() {
            return Err(SandboxError::InvalidCommand("command is empty".into()));
        }
        if let Some(cwd) = &opts.cwd {
            require_absolute(cwd)?;
        }

        let id = match opts.process_id {
            Some(id) => {
                validate_process_id(&id)?;
                id
            }
            None => generate_process_id(),
        };
        if self.records.read().await.contains_key(&id) {
            return Err(SandboxError::Validation(format!(
                "process id already in use: {id}"
            )));
        }

        let record = Arc::new(ProcessRecord::new(
            id.clone(),
            command.to_string(),
            self.session_id.clone(),
            &self.temp_dir,
            opts.auto_cleanup,
        ));
        self.records
            .write()
            .await
            .insert(id.clone(), Arc::clone(&record));

        let launch = compose_launch(command, &record, opts.cwd.as_deref(), &opts.env);
        let result = session.exec(&launch, ExecOptions::default()).await;

        let pid = match result {
            Ok(res) if res.success => res.stdout.trim().parse::<u32>().ok(),
            Ok(res) => {
                record.set_start_error(res.stderr.clone());
                record.remove_capture_files().await;
                return Err(SandboxError::ProcessStart(format!(
                    "launch command failed with exit code {}: {}",
                    res.exit_code,
                    res.stderr.trim()
                )));
            }
            Err(e) => {
                record.set_start_error(e.to_string());
                record.remove_capture_files().await;
                return Err(e);
            }
        };

        let Some(pid) = pid else {
            record.set_start_error("shell did not print a pid".into());
            record.remove_capture_files().await;
            return Err(SandboxError::ProcessStart(
                "could not determine pid of launched process".into(),
            ));
        };

        record.set_running(pid);
        debug!(session = %self.session_id, process = %id, pid, "background process started");

        if let Some(timeout) = opts.timeout {
            spawn_timeout_guard(Arc::clone(&record), timeout);
        }

        Ok(record.info())
    }

    /// Snapshot one process, refreshing a stale `running` status first.
    pub async fn get(&self, id: &str) -> Result<ProcessInfo> {
        let record = self.record(id).await?;
        self.refresh(&record).await;
        Ok(record.info())
    }

    /// Snapshot all processes, refreshing stale `running` statuses.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut infos = Vec::with_capacity(records.len());
        for record in records {
            self.refresh(&record).await;
            infos.push(record.info());
        }
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        infos
    }

    /// Current log snapshots, refreshed from the capture files.
    pub async fn logs(&self, id: &str) -> Result<ProcessLogs> {
        let record = self.record(id).await?;
        record.refresh_from_files().await;
        self.refresh(&record).await;
        Ok(record.logs())
    }

    /// Subscribe to a process's log stream.
    ///
    /// Returns the already-captured text (delivered as initial chunks), the
    /// terminal status when the process is already done, and the live
    /// receiver. Ensures a monitor task is polling while subscribers exist.
    pub async fn stream(
        &self,
        id: &str,
    ) -> Result<(
        ProcessLogs,
        Option<(ProcessStatus, Option<i32>)>,
        broadcast::Receiver<ProcessStreamEvent>,
    )> {
        let record = self.record(id).await?;
        record.refresh_from_files().await;
        let subscription = record.subscribe();
        monitor::ensure_monitor(&record);
        Ok(subscription)
    }

    /// SIGTERM → grace → SIGKILL, then settle the record as `killed`.
    pub async fn kill(&self, id: &str) -> Result<ProcessInfo> {
        let record = self.record(id).await?;
        kill_record(&record).await;
        Ok(record.info())
    }

    /// Kill every process still running; returns how many were killed.
    pub async fn kill_all(&self) -> usize {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut killed = 0;
        for record in records {
            self.refresh(&record).await;
            if !record.status().is_terminal() {
                kill_record(&record).await;
                killed += 1;
            }
        }
        killed
    }

    /// Whether this session owns the given process id.
    pub async fn contains(&self, id: &str) -> bool {
        self.records.read().await.contains_key(id)
    }

    /// Remove every capture file; used on session destruction.
    pub(crate) async fn remove_capture_files(&self) {
        let records: Vec<_> = self.records.read().await.values().cloned().collect();
        for record in records {
            record.remove_capture_files().await;
        }
    }

    async fn record(&self, id: &str) -> Result<Arc<ProcessRecord>> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SandboxError::not_found(ResourceKind::Process, id))
    }

    /// Poll liveness for a `running` record and settle it if the process is
    /// gone. Terminal transitions notify subscribers exactly once.
    async fn refresh(&self, record: &Arc<ProcessRecord>) {
        if record.status() != ProcessStatus::Running {
            return;
        }
        let alive = record.pid().is_some_and(liveness::pid_alive);
        if !alive {
            monitor::finalize(record).await;
        }
    }
}

async fn kill_record(record: &Arc<ProcessRecord>) {
    if record.status().is_terminal() {
        return;
    }
    if let Some(pid) = record.pid() {
        liveness::terminate(pid).await;
    }
    record.refresh_from_files().await;
    let exit_code = record.read_exit_code().await;
    if record.mark_terminal(ProcessStatus::Killed, exit_code) && record.auto_cleanup {
        record.remove_capture_files().await;
    }
}

fn spawn_timeout_guard(record: Arc<ProcessRecord>, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        if !record.status().is_terminal() {
            warn!(process = %record.id, ?timeout, "process exceeded its timeout, killing");
            kill_record(&record).await;
        }
    });
}

/// Compose the detached launch command.
///
/// The inner `sh -c` wrapper records the user command's exit code into the
/// sidecar so the supervisor can distinguish `completed` from `failed`
/// after the fact. A cwd override runs in a subshell so it cannot leak
/// into the session's working directory.
fn compose_launch(
    command: &str,
    record: &ProcessRecord,
    cwd: Option<&str>,
    env: &[(String, String)],
) -> String {
    let inner = format!(
        "{{ {command}\n}}; printf '%s' \"$?\" > {code}",
        code = quote(&record.code_path.to_string_lossy()),
    );

    let mut launch = String::from("nohup ");
    if !env.is_empty() {
        launch.push_str("env ");
        for (key, value) in env {
            launch.push_str(&quote(&format!("{key}={value}")));
            launch.push(' ');
        }
    }
    launch.push_str(&format!(
        "sh -c {} > {} 2> {} & echo $!",
        quote(&inner),
        quote(&record.stdout_path.to_string_lossy()),
        quote(&record.stderr_path.to_string_lossy()),
    ));

    match cwd {
        Some(dir) => format!("( cd {} && {launch} )", quote(dir)),
        None => launch,
    }
}

fn quote(s: &str) -> String {
    shlex::try_quote(s)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", s.replace('\'', r"'\''")))
}

fn generate_process_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Caller-supplied ids end up in capture file names; keep them boring.
fn validate_process_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(SandboxError::Validation(format!(
            "invalid process id: {id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn record(id: &str) -> ProcessRecord {
        ProcessRecord::new(
            id.into(),
            "python3 -m http.server".into(),
            "default".into(),
            Path::new("/tmp"),
            true,
        )
    }

    #[test]
    fn launch_command_shape() {
        let r = record("web1");
        let launch = compose_launch("python3 -m http.server", &r, None, &[]);
        assert!(launch.starts_with("nohup sh -c "));
        assert!(launch.ends_with("& echo $!"));
        assert!(launch.contains("/tmp/proc_web1.stdout"));
        assert!(launch.contains("/tmp/proc_web1.stderr"));
    }

    #[test]
    fn launch_command_with_cwd_and_env() {
        let r = record("web2");
        let launch = compose_launch(
            "./serve",
            &r,
            Some("/srv/app"),
            &[("PORT".into(), "8080".into())],
        );
        assert!(launch.starts_with("( cd /srv/app && nohup env "));
        assert!(launch.contains("PORT=8080"));
        assert!(launch.ends_with(')'));
    }

    #[test]
    fn process_id_validation() {
        assert!(validate_process_id("build-42_a").is_ok());
        assert!(validate_process_id("").is_err());
        assert!(validate_process_id("../evil").is_err());
        assert!(validate_process_id("has space").is_err());
    }

    #[test]
    fn generated_ids_are_short_and_unique() {
        let a = generate_process_id();
        let b = generate_process_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
        assert!(validate_process_id(&a).is_ok());
    }
}
