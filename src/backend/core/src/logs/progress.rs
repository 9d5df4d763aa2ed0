//! Best-effort progress estimation for the mirror stage.
//!
//! `total_images` is derived once from the generated mapping file's
//! entry count; `completed_images` is derived by counting occurrences of
//! a marker substring in the mirror-tool output stream. Markers may
//! recur or arrive out of order, so both counters are approximations
//! for display, never control flow.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::aggregator::{JobLogs, LogStream};
use crate::error::Result;

/// Marker substring the mirror tool emits once per copied blob.
pub const MIRROR_PROGRESS_MARKER: &str = "Copying blob";

/// Shared image counters for one job.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicU64,
    completed: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn set_completed(&self, completed: u64) {
        self.completed.store(completed, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Completion percentage, if a total is known. Capped at 100 since
    /// markers can recur.
    pub fn percent(&self) -> Option<u8> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some(((self.completed() * 100) / total).min(100) as u8)
    }
}

/// Count mirrorable entries in a mapping file: non-empty lines that are
/// not comments.
pub fn count_mapping_entries(path: &Path) -> Result<u64> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .count() as u64)
}

/// Observe the mirror stream and keep `completed` in sync with the
/// marker count, including markers already present from a previous
/// attempt. Runs until aborted or the stream's writer side is gone.
pub fn spawn_marker_counter(
    logs: Arc<JobLogs>,
    tracker: Arc<ProgressTracker>,
) -> Result<JoinHandle<()>> {
    let cursor = logs.tail(LogStream::Mirror)?;
    Ok(tokio::spawn(async move {
        let mut count: u64 = cursor
            .replay
            .iter()
            .filter(|line| line.contains(MIRROR_PROGRESS_MARKER))
            .count() as u64;
        tracker.set_completed(count);

        let mut live = cursor.live;
        loop {
            match live.recv().await {
                Ok(line) => {
                    if line.contains(MIRROR_PROGRESS_MARKER) {
                        count += 1;
                        tracker.set_completed(count);
                    }
                }
                // Counting is best-effort: after a lag gap, resync from
                // the file and keep going.
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Ok(lines) = logs.read_all(LogStream::Mirror, None) {
                        count = lines
                            .iter()
                            .filter(|line| line.contains(MIRROR_PROGRESS_MARKER))
                            .count() as u64;
                        tracker.set_completed(count);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_count_mapping_entries_skips_blanks_and_comments() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("images-mapping.txt");
        std::fs::write(
            &path,
            "# header comment\n\
             cp.icr.io/cp/app@sha256:aaa=registry.example.com:5000/cp/app\n\
             \n\
             cp.icr.io/cp/db@sha256:bbb=registry.example.com:5000/cp/db\n\
             # trailing comment\n",
        )
        .unwrap();
        assert_eq!(count_mapping_entries(&path).unwrap(), 2);
    }

    #[test]
    fn test_percent() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.percent(), None);

        tracker.set_total(4);
        tracker.set_completed(1);
        assert_eq!(tracker.percent(), Some(25));

        // Recurring markers can push completed past total; percent caps.
        tracker.set_completed(9);
        assert_eq!(tracker.percent(), Some(100));
    }

    #[tokio::test]
    async fn test_marker_counter_counts_replay_and_live() {
        let dir = TempDir::new().unwrap();
        let logs = Arc::new(JobLogs::open(dir.path(), "progress-test").unwrap());
        let tracker = Arc::new(ProgressTracker::new());

        logs.append(LogStream::Mirror, "Copying blob sha256:aaa").unwrap();
        logs.append(LogStream::Mirror, "unrelated output").unwrap();

        let handle = spawn_marker_counter(logs.clone(), tracker.clone()).unwrap();

        logs.append(LogStream::Mirror, "Copying blob sha256:bbb").unwrap();
        logs.append(LogStream::Mirror, "Copying config sha256:ccc").unwrap();
        logs.append(LogStream::Mirror, "Copying blob sha256:ddd").unwrap();

        // The counter task runs concurrently; give it a moment.
        for _ in 0..50 {
            if tracker.completed() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.completed(), 3);
        handle.abort();
    }
}
