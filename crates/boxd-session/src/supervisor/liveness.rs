//! PID probing and signal escalation for detached processes.
//!
//! Background processes are started detached through the session shell, so
//! there is no `Child` handle to reap; liveness and termination go through
//! signals by PID.

use std::time::Duration;
use tokio::time::sleep;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Grace window between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);
const KILL_POLL: Duration = Duration::from_millis(100);

/// Zero-signal probe: does the PID refer to a live process right now?
#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    match signal::kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        // EPERM and friends mean the process exists but is not ours.
        Err(_) => true,
    }
}

#[cfg(not(unix))]
pub(crate) fn pid_alive(_pid: u32) -> bool {
    false
}

/// SIGTERM, a short grace poll, then SIGKILL if still alive.
#[cfg(unix)]
pub(crate) async fn terminate(pid: u32) {
    let nix_pid = Pid::from_raw(pid as i32);

    if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
        if e == Errno::ESRCH {
            return;
        }
    }

    let mut waited = Duration::ZERO;
    while waited < KILL_GRACE {
        sleep(KILL_POLL).await;
        waited += KILL_POLL;
        if !pid_alive(pid) {
            return;
        }
    }

    let _ = signal::kill(nix_pid, Signal::SIGKILL);
    // Give the kernel a beat so callers observe the exit.
    sleep(KILL_POLL).await;
}

#[cfg(not(unix))]
pub(crate) async fn terminate(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn probe_handles_missing_pid() {
        assert!(!pid_alive(999_999));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn terminate_is_quiet_for_missing_pid() {
        terminate(999_999).await;
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn terminate_kills_a_live_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .expect("failed to spawn sleep");
        let pid = child.id().expect("no PID");

        terminate(pid).await;

        // Reap so the liveness probe sees the exit rather than a zombie.
        let _ = child.wait().await;
        assert!(!pid_alive(pid));
    }
}
