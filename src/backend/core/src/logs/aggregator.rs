//! Append-only log streams for one job.
//!
//! Log files are appended to for the job's entire lifetime, across
//! retries; they are never truncated or rewritten. Appends are flushed
//! before returning, and the live broadcast is published under the same
//! lock as the file write, so a tail cursor taken at any moment sees
//! every existing line exactly once (replay) followed by every new line
//! exactly once (live), with no gap or duplication at the boundary.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::Result;

/// Per-stream broadcast ring size. A tailer falling this many lines
/// behind is disconnected with an overflow notice.
pub(crate) const TAIL_BUFFER_LINES: usize = 4096;

/// Which of a job's two log streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStream {
    /// Application/event stream
    App,
    /// Raw mirror-tool output stream
    Mirror,
}

impl LogStream {
    /// File name of this stream inside the job's working directory.
    pub fn file_name(&self, job_name: &str) -> String {
        match self {
            Self::App => format!("{}-download.log", job_name),
            Self::Mirror => format!("{}-mirror.log", job_name),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "app" => Some(Self::App),
            "mirror" => Some(Self::Mirror),
            _ => None,
        }
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::App => write!(f, "app"),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

struct StreamState {
    path: PathBuf,
    /// Guards the file append and the broadcast publish together.
    file: Mutex<File>,
    tx: broadcast::Sender<Arc<str>>,
}

impl StreamState {
    fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let (tx, _) = broadcast::channel(TAIL_BUFFER_LINES);
        Ok(Self {
            path,
            file: Mutex::new(file),
            tx,
        })
    }
}

/// Replay-then-live cursor over one stream.
pub struct TailCursor {
    /// Lines that existed when the cursor was taken.
    pub replay: Vec<String>,
    /// Lines appended after the cursor was taken.
    pub live: broadcast::Receiver<Arc<str>>,
}

/// Owns both append-only streams of one job.
pub struct JobLogs {
    app: StreamState,
    mirror: StreamState,
}

impl JobLogs {
    /// Open (creating if necessary) both stream files under `work_dir`.
    pub fn open(work_dir: &Path, job_name: &str) -> Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        Ok(Self {
            app: StreamState::open(work_dir.join(LogStream::App.file_name(job_name)))?,
            mirror: StreamState::open(work_dir.join(LogStream::Mirror.file_name(job_name)))?,
        })
    }

    fn state(&self, stream: LogStream) -> &StreamState {
        match stream {
            LogStream::App => &self.app,
            LogStream::Mirror => &self.mirror,
        }
    }

    /// Path of one stream's backing file.
    pub fn path(&self, stream: LogStream) -> &Path {
        &self.state(stream).path
    }

    /// Append one line, durable to the backing file before returning.
    pub fn append(&self, stream: LogStream, line: &str) -> Result<()> {
        let state = self.state(stream);
        let mut file = state.file.lock();
        writeln!(file, "{}", line)?;
        file.flush()?;
        // Published under the lock so tail cursors never straddle a line.
        let _ = state.tx.send(Arc::from(line));
        Ok(())
    }

    /// Full content of one stream, optionally only the last `tail` lines.
    pub fn read_all(&self, stream: LogStream, tail: Option<usize>) -> Result<Vec<String>> {
        let state = self.state(stream);
        // Hold the append lock so a snapshot never splits a line.
        let _guard = state.file.lock();
        let lines = Self::read_lines(&state.path)?;
        Ok(match tail {
            Some(n) if n < lines.len() => lines[lines.len() - n..].to_vec(),
            _ => lines,
        })
    }

    /// Take a replay-then-live cursor over one stream.
    pub fn tail(&self, stream: LogStream) -> Result<TailCursor> {
        let state = self.state(stream);
        let guard = state.file.lock();
        let replay = Self::read_lines(&state.path)?;
        let live = state.tx.subscribe();
        drop(guard);
        Ok(TailCursor { replay, live })
    }

    /// Number of live tail subscribers on one stream.
    pub fn subscriber_count(&self, stream: LogStream) -> usize {
        self.state(stream).tx.receiver_count()
    }

    fn read_lines(path: &Path) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_logs(dir: &TempDir) -> JobLogs {
        JobLogs::open(dir.path(), "test-job").unwrap()
    }

    #[test]
    fn test_append_is_durable() {
        let dir = TempDir::new().unwrap();
        let logs = open_logs(&dir);
        logs.append(LogStream::App, "first line").unwrap();
        logs.append(LogStream::App, "second line").unwrap();

        let content = std::fs::read_to_string(logs.path(LogStream::App)).unwrap();
        assert_eq!(content, "first line\nsecond line\n");
    }

    #[test]
    fn test_streams_are_separate() {
        let dir = TempDir::new().unwrap();
        let logs = open_logs(&dir);
        logs.append(LogStream::App, "app line").unwrap();
        logs.append(LogStream::Mirror, "mirror line").unwrap();

        assert_eq!(logs.read_all(LogStream::App, None).unwrap(), vec!["app line"]);
        assert_eq!(
            logs.read_all(LogStream::Mirror, None).unwrap(),
            vec!["mirror line"]
        );
    }

    #[test]
    fn test_read_all_tail() {
        let dir = TempDir::new().unwrap();
        let logs = open_logs(&dir);
        for i in 0..10 {
            logs.append(LogStream::App, &format!("line {}", i)).unwrap();
        }
        let tail = logs.read_all(LogStream::App, Some(3)).unwrap();
        assert_eq!(tail, vec!["line 7", "line 8", "line 9"]);

        let all = logs.read_all(LogStream::App, Some(100)).unwrap();
        assert_eq!(all.len(), 10);
    }

    #[tokio::test]
    async fn test_tail_replay_then_live_without_gap_or_duplication() {
        let dir = TempDir::new().unwrap();
        let logs = open_logs(&dir);
        for i in 0..5 {
            logs.append(LogStream::Mirror, &format!("old {}", i)).unwrap();
        }

        let mut cursor = logs.tail(LogStream::Mirror).unwrap();
        assert_eq!(cursor.replay.len(), 5);

        for i in 0..5 {
            logs.append(LogStream::Mirror, &format!("new {}", i)).unwrap();
        }

        let mut live = Vec::new();
        for _ in 0..5 {
            live.push(cursor.live.recv().await.unwrap().to_string());
        }
        assert_eq!(live, vec!["new 0", "new 1", "new 2", "new 3", "new 4"]);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = TempDir::new().unwrap();
        {
            let logs = open_logs(&dir);
            logs.append(LogStream::App, "before restart").unwrap();
        }
        let logs = open_logs(&dir);
        logs.append(LogStream::App, "after restart").unwrap();
        assert_eq!(
            logs.read_all(LogStream::App, None).unwrap(),
            vec!["before restart", "after restart"]
        );
    }
}
