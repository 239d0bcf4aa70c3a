//! Capture-file polling for subscribed processes.
//!
//! A record gets a monitor task while it has at least one log subscriber
//! and is still running. The task folds file growth into the cache (which
//! publishes deltas), refreshes liveness, and exits when the process
//! reaches a terminal status or the last subscriber leaves.

use super::liveness;
use super::record::ProcessRecord;
use boxd_core::ProcessStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Start the monitor task for a record unless one is already running.
pub(crate) fn ensure_monitor(record: &Arc<ProcessRecord>) {
    let mut guard = record.monitor.lock().unwrap();
    if guard.as_ref().is_some_and(|handle| !handle.is_finished()) {
        return;
    }
    if record.status().is_terminal() {
        return;
    }
    let task_record = Arc::clone(record);
    *guard = Some(tokio::spawn(async move {
        monitor_loop(task_record).await;
    }));
}

async fn monitor_loop(record: Arc<ProcessRecord>) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;

        if record.subscriber_count() == 0 {
            debug!(process = %record.id, "last subscriber left, stopping monitor");
            break;
        }

        record.refresh_from_files().await;

        if record.status().is_terminal() {
            break;
        }
        let alive = record.pid().is_some_and(liveness::pid_alive);
        if !alive {
            finalize(&record).await;
            break;
        }
    }
}

/// The process died on its own: flush the last output, recover the exit
/// code from the sidecar and settle the status.
pub(crate) async fn finalize(record: &Arc<ProcessRecord>) {
    record.refresh_from_files().await;
    let exit_code = record.read_exit_code().await;
    let status = match exit_code {
        Some(code) if code != 0 => ProcessStatus::Failed,
        // No sidecar means the wrapper never got to write one (e.g. killed
        // by a signal); without evidence of failure we settle on completed.
        _ => ProcessStatus::Completed,
    };
    if record.mark_terminal(status, exit_code) && record.auto_cleanup {
        record.remove_capture_files().await;
    }
}
