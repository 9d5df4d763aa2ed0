//! Spawning and supervising one external command.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ErrorCode, MirrorError, Result};
use crate::logs::{JobLogs, LogStream};

use super::command::CommandSpec;

/// Lines of combined output retained in memory for failure reporting.
/// Full output always lands in the log files.
const COMBINED_OUTPUT_CAP: usize = 500;

/// How an external command finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited on its own with this code.
    Exited { code: i32 },
    /// Process died on a signal without exiting.
    Crashed,
    /// Timeout hit; the process was killed and has exited.
    TimedOut,
    /// Stop requested; the process was killed and has exited.
    Stopped,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

/// Result of one command run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: RunOutcome,
    /// Tail of combined stdout+stderr, newest last.
    pub combined_output: String,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// The last `n` lines of combined output.
    pub fn output_tail(&self, n: usize) -> String {
        let lines: Vec<&str> = self.combined_output.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..].join("\n")
    }
}

/// Runs external commands for one job, streaming their output into the
/// job's log aggregator.
pub struct Runner {
    logs: Arc<JobLogs>,
}

impl Runner {
    pub fn new(logs: Arc<JobLogs>) -> Self {
        Self { logs }
    }

    /// Spawn a command. Output flows to `stream` line by line as it is
    /// produced, so live tails reflect real progress. The invocation is
    /// logged with timestamp, redacted command line, and attempt number.
    pub fn spawn(
        &self,
        spec: &CommandSpec,
        stream: LogStream,
        attempt: u32,
    ) -> Result<RunningProcess> {
        self.logs.append(
            LogStream::App,
            &format!(
                "[{}] attempt {}: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                attempt,
                spec.display_line()
            ),
        )?;
        tracing::info!(command = %spec.display_line(), attempt, "spawning external command");

        let mut child = spec
            .build()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                MirrorError::with_internal(
                    ErrorCode::SubprocessSpawnFailed,
                    format!("failed to spawn '{}'", spec.program),
                    e.to_string(),
                )
            })?;

        let pid = child.id().ok_or_else(|| {
            MirrorError::new(ErrorCode::SubprocessSpawnFailed, "spawned process has no pid")
        })?;

        let combined = Arc::new(Mutex::new(VecDeque::with_capacity(COMBINED_OUTPUT_CAP)));
        let mut output_tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            output_tasks.push(forward_lines(stdout, self.logs.clone(), stream, combined.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            output_tasks.push(forward_lines(stderr, self.logs.clone(), stream, combined.clone()));
        }

        Ok(RunningProcess {
            child,
            pid,
            output_tasks,
            combined,
        })
    }
}

/// Copy lines from one pipe into the log aggregator and the in-memory
/// combined-output ring.
fn forward_lines<R>(
    pipe: R,
    logs: Arc<JobLogs>,
    stream: LogStream,
    combined: Arc<Mutex<VecDeque<String>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Err(e) = logs.append(stream, &line) {
                tracing::warn!(error = %e, "failed to append process output line");
            }
            let mut buf = combined.lock();
            if buf.len() == COMBINED_OUTPUT_CAP {
                buf.pop_front();
            }
            buf.push_back(line);
        }
    })
}

/// A spawned external command that has not yet been waited on.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    pid: u32,
    output_tasks: Vec<JoinHandle<()>>,
    combined: Arc<Mutex<VecDeque<String>>>,
}

impl RunningProcess {
    /// OS pid, recorded as the job's single active process handle.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait for the process to finish, the timeout to expire, or a stop
    /// request. On timeout or stop the process is killed and awaited, so
    /// by the time this returns no child process remains.
    pub async fn wait(
        mut self,
        timeout: Duration,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<RunResult> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut stop_closed = false;

        // A stop raised before this receiver subscribed would otherwise
        // go unseen until the process exits on its own.
        if *stop.borrow() {
            tracing::info!(pid = self.pid, "stop already requested, terminating external command");
            self.kill_and_reap().await?;
            return self.finish(RunOutcome::Stopped).await;
        }

        let outcome = loop {
            tokio::select! {
                status = self.child.wait() => {
                    let status = status?;
                    break match status.code() {
                        Some(code) => RunOutcome::Exited { code },
                        None => RunOutcome::Crashed,
                    };
                }
                _ = &mut deadline => {
                    tracing::warn!(pid = self.pid, "external command timed out, killing");
                    self.kill_and_reap().await?;
                    break RunOutcome::TimedOut;
                }
                changed = stop.changed(), if !stop_closed => {
                    match changed {
                        Ok(()) if *stop.borrow() => {
                            tracing::info!(pid = self.pid, "stop requested, terminating external command");
                            self.kill_and_reap().await?;
                            break RunOutcome::Stopped;
                        }
                        Ok(()) => {}
                        Err(_) => stop_closed = true,
                    }
                }
            }
        };

        self.finish(outcome).await
    }

    /// Drain the output forwarders so every produced line is in the log,
    /// then assemble the result.
    async fn finish(mut self, outcome: RunOutcome) -> Result<RunResult> {
        for task in self.output_tasks.drain(..) {
            let _ = task.await;
        }

        let combined_output = {
            let buf = self.combined.lock();
            buf.iter().cloned().collect::<Vec<_>>().join("\n")
        };

        Ok(RunResult {
            outcome,
            combined_output,
        })
    }

    /// Kill the process and wait until it has actually exited.
    async fn kill_and_reap(&mut self) -> Result<()> {
        if let Err(e) = self.child.start_kill() {
            // Already gone is fine; anything else is worth recording.
            tracing::debug!(pid = self.pid, error = %e, "kill failed");
        }
        let _ = self.child.wait().await?;
        Ok(())
    }
}
