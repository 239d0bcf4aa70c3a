//! Temp file reaper.
//!
//! Transport and capture files are deleted by their owners on the happy
//! path; the reaper sweeps up whatever a crashed command or dropped stream
//! left behind.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const PREFIXES: &[&str] = &["boxd_cmd_", "proc_"];

pub fn spawn_reaper(temp_dir: PathBuf, interval: Duration, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match sweep(&temp_dir, max_age).await {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "reaped stale temp files"),
                Err(e) => warn!(error = %e, "temp reaper sweep failed"),
            }
        }
    })
}

async fn sweep(temp_dir: &PathBuf, max_age: Duration) -> std::io::Result<usize> {
    let cutoff = SystemTime::now() - max_age;
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(temp_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let stale = meta.modified().map(|m| m < cutoff).unwrap_or(false);
        if stale && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sweep_removes_only_stale_prefixed_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("boxd_cmd_dead.out");
        let fresh = dir.path().join("boxd_cmd_live.out");
        let other = dir.path().join("unrelated.txt");
        for p in [&stale, &fresh, &other] {
            std::fs::write(p, b"x").unwrap();
        }
        // A zero max_age makes every prefixed file stale.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let removed = sweep(&dir.path().to_path_buf(), Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert!(other.exists());
    }
}
