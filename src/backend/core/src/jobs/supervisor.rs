//! The per-job supervisor task.
//!
//! One supervisor owns one job for the duration of an attempt. It is
//! the record's single writer: it drives the pipeline stages in order,
//! runs every external command through the process runner, applies the
//! retry policy, honors stop requests, and on reaching a terminal state
//! writes the summary report and dispatches notifications before
//! exiting.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::Result;
use crate::logs::{count_mapping_entries, spawn_marker_counter, JobLogs, LogStream, ProgressTracker};
use crate::notify::{JobEvent, JobEventKind, NotificationDispatcher};
use crate::process::{CommandSpec, RunOutcome, Runner};
use crate::report::{collect_failed_images, ReportGenerator};
use crate::sysinfo;

use super::record::{JobRecord, Stage, StageOutcome, StageRecord};
use super::retry::RetryPolicy;
use super::stages::StageCommands;

/// Catalog hosts probed before deciding whether the package fetch needs
/// the OCI fallback repository.
const CATALOG_HOSTS: [&str; 2] = ["https://github.com", "https://raw.githubusercontent.com"];

/// How a pipeline run ended.
enum PipelineEnd {
    Completed,
    Failed(String),
    Stopped,
}

/// Outcome of one stage (all attempts included).
enum StageResult {
    Success,
    /// Failed but the pipeline continues (fetch-from-cache fallback).
    Warning,
    Failed(String),
    Stopped,
}

pub struct Supervisor {
    record: Arc<RwLock<JobRecord>>,
    logs: Arc<JobLogs>,
    progress: Arc<ProgressTracker>,
    stop: watch::Receiver<bool>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    commands: StageCommands,
    runner: Runner,
    retry_policy: RetryPolicy,
    stage_timeout: Duration,
    mirror_timeout: Duration,
    probe_catalog: bool,
}

impl Supervisor {
    /// Spawn the supervisor task for one job attempt.
    pub fn spawn(
        record: Arc<RwLock<JobRecord>>,
        logs: Arc<JobLogs>,
        progress: Arc<ProgressTracker>,
        stop: watch::Receiver<bool>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: &Config,
    ) -> JoinHandle<()> {
        let supervisor = Self {
            record,
            logs: logs.clone(),
            progress,
            stop,
            dispatcher,
            commands: StageCommands::new(config.tools.clone()),
            runner: Runner::new(logs),
            retry_policy: RetryPolicy::new(config.mirror.max_retries, config.mirror.retry_base_delay),
            stage_timeout: config.mirror.stage_timeout,
            mirror_timeout: config.mirror.mirror_timeout,
            probe_catalog: config.mirror.check_catalog_reachability,
        };
        tokio::spawn(supervisor.run())
    }

    async fn run(mut self) {
        let (job_id, component, version, resumed) = {
            let mut record = self.record.write();
            record.mark_started();
            (
                record.id,
                record.component.clone(),
                record.version.clone(),
                record.retry_count > 0,
            )
        };
        self.persist();

        self.log_info(&format!(
            "mirror job started: {} v{} ({})",
            component,
            version,
            if resumed { "retry" } else { "initial attempt" }
        ));
        let start_kind = if resumed { JobEventKind::Resumed } else { JobEventKind::Started };
        self.notify(start_kind, &format!("Mirror {} for {} v{}",
            if resumed { "resumed" } else { "started" }, component, version)).await;

        let end = self.execute_pipeline().await;

        // Fold the final marker count into the record before reporting.
        let failed_images = self
            .logs
            .read_all(LogStream::Mirror, None)
            .map(|lines| collect_failed_images(&lines))
            .unwrap_or_default();
        {
            let mut record = self.record.write();
            record.completed_images = self.progress.completed();
            record.total_images = self.progress.total().max(record.total_images);
            match &end {
                PipelineEnd::Completed => record.mark_completed(),
                PipelineEnd::Failed(detail) => record.mark_failed(detail.clone()),
                PipelineEnd::Stopped => record.mark_stopped(),
            }
        }
        self.persist();

        let snapshot = self.record.read().clone();
        match ReportGenerator::write(&snapshot, &failed_images) {
            Ok(path) => self.log_info(&format!("summary report generated: {}", path.display())),
            Err(e) => self.log_warn(&format!("failed to write summary report: {}", e)),
        }

        let (kind, message) = match &end {
            PipelineEnd::Completed => (
                JobEventKind::Completed,
                format!("Mirror completed for {} v{}", component, version),
            ),
            PipelineEnd::Failed(detail) => (
                JobEventKind::Failed,
                format!("Mirror failed for {} v{}: {}", component, version, detail),
            ),
            PipelineEnd::Stopped => (
                JobEventKind::Stopped,
                format!("Mirror stopped for {} v{}", component, version),
            ),
        };
        self.log_info(&format!("job finished with status '{}'", snapshot.status));
        self.notify(kind, &message).await;

        tracing::info!(job_id = %job_id, status = %snapshot.status, "supervisor exiting");
    }

    // ─── Pipeline ────────────────────────────────────────────────────────────

    async fn execute_pipeline(&mut self) -> PipelineEnd {
        // A retried job resumes from its surviving mapping file; otherwise
        // it runs the full pipeline again.
        let (mode_generates, resume_mapping) = {
            let record = self.record.read();
            let mapping = StageCommands::mapping_file(&record);
            (
                record.mode.generates_manifests(),
                record.retry_count > 0 && mapping.is_file(),
            )
        };
        let generate = mode_generates && !resume_mapping;
        if resume_mapping {
            self.log_info("existing mapping file found, resuming mirror");
        }

        match self.preflight().await {
            StageResult::Success | StageResult::Warning => {}
            StageResult::Failed(detail) => return PipelineEnd::Failed(detail),
            StageResult::Stopped => return PipelineEnd::Stopped,
        }

        match self.authenticate().await {
            StageResult::Success | StageResult::Warning => {}
            StageResult::Failed(detail) => return PipelineEnd::Failed(detail),
            StageResult::Stopped => return PipelineEnd::Stopped,
        }

        if generate {
            match self.fetch().await {
                StageResult::Success | StageResult::Warning => {}
                StageResult::Failed(detail) => return PipelineEnd::Failed(detail),
                StageResult::Stopped => return PipelineEnd::Stopped,
            }

            match self.generate_manifests().await {
                StageResult::Success | StageResult::Warning => {}
                StageResult::Failed(detail) => return PipelineEnd::Failed(detail),
                StageResult::Stopped => return PipelineEnd::Stopped,
            }
        } else {
            let mapping = {
                let record = self.record.read();
                StageCommands::mapping_file(&record)
            };
            if !mapping.is_file() {
                return PipelineEnd::Failed(format!(
                    "mapping file not found for resume: {}",
                    mapping.display()
                ));
            }
            match count_mapping_entries(&mapping) {
                Ok(total) => {
                    self.progress.set_total(total);
                    self.record.write().total_images = total;
                }
                Err(e) => self.log_warn(&format!("failed to count mapping entries: {}", e)),
            }
        }

        match self.mirror().await {
            StageResult::Success | StageResult::Warning => PipelineEnd::Completed,
            StageResult::Failed(detail) => PipelineEnd::Failed(detail),
            StageResult::Stopped => PipelineEnd::Stopped,
        }
    }

    /// Gating checks: free disk space and the package-manager plugin.
    /// Fatal on failure, never retried.
    async fn preflight(&mut self) -> StageResult {
        self.begin_stage(Stage::Preflight);

        let (needs_disk, home_dir, min_gb) = {
            let record = self.record.read();
            (
                record.mode.needs_local_storage(),
                record.config.home_dir.clone(),
                record.config.min_disk_space_gb,
            )
        };

        if needs_disk {
            let started = std::time::Instant::now();
            match sysinfo::available_disk_gb(&home_dir) {
                Ok(available) if available >= min_gb => {
                    self.log_info(&format!(
                        "disk space check passed ({}GB available, {}GB required)",
                        available, min_gb
                    ));
                }
                Ok(available) => {
                    let detail = format!(
                        "insufficient disk space: {}GB available, {}GB required",
                        available, min_gb
                    );
                    self.record_attempt(Stage::Preflight, 1, StageOutcome::Failed, started.elapsed(), Some(detail.clone()));
                    self.log_error(&detail);
                    return StageResult::Failed(detail);
                }
                Err(e) => {
                    let detail = format!("disk space check failed: {}", e);
                    self.record_attempt(Stage::Preflight, 1, StageOutcome::Failed, started.elapsed(), Some(detail.clone()));
                    self.log_error(&detail);
                    return StageResult::Failed(detail);
                }
            }
        } else {
            self.log_info("direct-to-registry mode: skipping disk space check");
        }

        let probe = self.commands.plugin_probe();
        self.run_stage(Stage::Preflight, probe, LogStream::App, self.stage_timeout, RetryPolicy::no_retry())
            .await
    }

    /// Registry login, retried. Skipped entirely when the auth file
    /// already carries credentials for the source registry, or when no
    /// entitlement key is available (the mirror tool then authenticates
    /// from the auth file on its own).
    async fn authenticate(&mut self) -> StageResult {
        self.begin_stage(Stage::Authenticate);

        let (auth_file, source_registry, key) = {
            let record = self.record.read();
            (
                record.config.registry_auth_file.clone(),
                record.config.source_registry.clone(),
                record.config.entitlement_key.clone(),
            )
        };

        if auth_file_has_credentials(&auth_file, &source_registry) {
            self.log_info(&format!(
                "existing credentials for {} found in {}, skipping login",
                source_registry,
                auth_file.display()
            ));
            self.record_attempt(Stage::Authenticate, 1, StageOutcome::Skipped, Duration::ZERO, None);
            return StageResult::Success;
        }

        let Some(key) = key else {
            self.log_warn("no entitlement key configured and no existing credentials found");
            self.log_info("continuing; the mirror stage will authenticate from the auth file");
            self.record_attempt(Stage::Authenticate, 1, StageOutcome::Skipped, Duration::ZERO, None);
            return StageResult::Success;
        };

        let login = {
            let record = self.record.read();
            self.commands.login(&record, &key)
        };
        self.run_stage(Stage::Authenticate, login, LogStream::App, self.stage_timeout, self.retry_policy)
            .await
    }

    /// Retrieve the versioned package, retried, with the local-cache
    /// fallback on final failure.
    async fn fetch(&mut self) -> StageResult {
        self.begin_stage(Stage::Fetch);
        self.configure_catalog_repo().await;

        let (command, cache_dir) = {
            let record = self.record.read();
            (self.commands.fetch(&record), StageCommands::package_cache_dir(&record))
        };

        match self
            .run_stage(Stage::Fetch, command, LogStream::App, self.stage_timeout, self.retry_policy)
            .await
        {
            StageResult::Failed(detail) => {
                if cache_dir.is_dir() {
                    self.log_warn("package fetch failed but a local copy exists, continuing from cache");
                    if let Some(last) = self.record.write().stage_history.last_mut() {
                        last.outcome = StageOutcome::Warning;
                    }
                    self.persist();
                    StageResult::Warning
                } else {
                    StageResult::Failed(detail)
                }
            }
            other => other,
        }
    }

    /// Best-effort: when the public catalog hosts are unreachable,
    /// switch the package manager to its OCI fallback repo. Never fatal.
    async fn configure_catalog_repo(&mut self) {
        if !self.probe_catalog {
            return;
        }
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
        {
            Ok(client) => client,
            Err(_) => return,
        };
        for host in CATALOG_HOSTS {
            if let Ok(resp) = client.head(host).send().await {
                if resp.status().as_u16() < 500 {
                    self.log_info(&format!("catalog reachable via {}", host));
                    return;
                }
            }
        }

        self.log_warn("catalog hosts unreachable, configuring OCI fallback repo");
        let command = {
            let record = self.record.read();
            self.commands.configure_fallback_repo(&record)
        };
        match self.runner.spawn(&command, LogStream::App, 1) {
            Ok(proc) => {
                let mut stop = self.stop.clone();
                match proc.wait(self.stage_timeout, &mut stop).await {
                    Ok(result) if result.is_success() => {
                        self.log_info("OCI fallback repo configured");
                    }
                    _ => self.log_warn("failed to configure OCI fallback repo, continuing"),
                }
            }
            Err(e) => self.log_warn(&format!("failed to configure OCI fallback repo: {}", e)),
        }
    }

    /// Produce the image mapping, retried; fatal without a mapping file.
    async fn generate_manifests(&mut self) -> StageResult {
        self.begin_stage(Stage::GenerateManifests);

        let (command, mapping) = {
            let record = self.record.read();
            (self.commands.generate_manifests(&record), StageCommands::mapping_file(&record))
        };

        let result = self
            .run_stage(Stage::GenerateManifests, command, LogStream::App, self.stage_timeout, self.retry_policy)
            .await;
        if !matches!(result, StageResult::Success) {
            return result;
        }

        if !mapping.is_file() {
            let detail = format!("manifest generation produced no mapping file at {}", mapping.display());
            self.log_error(&detail);
            return StageResult::Failed(detail);
        }

        match count_mapping_entries(&mapping) {
            Ok(total) => {
                self.log_info(&format!("total images to mirror: {}", total));
                self.progress.set_total(total);
                self.record.write().total_images = total;
                self.persist();
            }
            Err(e) => self.log_warn(&format!("failed to count mapping entries: {}", e)),
        }
        StageResult::Success
    }

    /// The long-running transfer. The tool owns per-image retry, so a
    /// clean non-zero exit is terminal; only a wholesale crash (spawn
    /// failure, signal death, timeout) earns one extra attempt.
    async fn mirror(&mut self) -> StageResult {
        self.begin_stage(Stage::Mirror);

        let (command, dry_run) = {
            let record = self.record.read();
            let mapping = StageCommands::mapping_file(&record);
            (self.commands.mirror(&record, &mapping), record.mode.is_dry_run())
        };
        if dry_run {
            self.log_info("[dry run] simulating image mirror process");
        }

        let counter = match spawn_marker_counter(self.logs.clone(), self.progress.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                self.log_warn(&format!("progress tracking unavailable: {}", e));
                None
            }
        };

        let mut result = StageResult::Failed("mirror stage never ran".to_string());
        for attempt in 1..=2u32 {
            if self.stop_requested() {
                result = StageResult::Stopped;
                break;
            }

            let (outcome, detail, duration) =
                self.run_attempt(&command, LogStream::Mirror, self.mirror_timeout, attempt).await;
            self.record_attempt(Stage::Mirror, attempt, outcome, duration, detail.clone());

            result = match outcome {
                StageOutcome::Succeeded => StageResult::Success,
                StageOutcome::Stopped => StageResult::Stopped,
                StageOutcome::TimedOut if attempt == 1 => {
                    self.log_warn("mirror process timed out, retrying once");
                    continue;
                }
                StageOutcome::Failed if detail.as_deref().map_or(false, is_crash_detail) && attempt == 1 => {
                    self.log_warn("mirror process crashed, retrying once");
                    continue;
                }
                _ => StageResult::Failed(
                    detail.unwrap_or_else(|| "image mirroring failed".to_string()),
                ),
            };
            break;
        }

        if let Some(counter) = counter {
            counter.abort();
        }
        // The counter task may have been aborted mid-delivery; the file
        // is authoritative for the final count.
        if let Ok(lines) = self.logs.read_all(LogStream::Mirror, None) {
            let count = lines
                .iter()
                .filter(|line| line.contains(crate::logs::MIRROR_PROGRESS_MARKER))
                .count() as u64;
            self.progress.set_completed(count);
        }
        {
            let mut record = self.record.write();
            record.completed_images = self.progress.completed();
        }

        if matches!(result, StageResult::Success) {
            self.log_info(if dry_run {
                "[dry run] image mirror simulation completed successfully"
            } else {
                "image mirroring completed"
            });
        }
        result
    }

    // ─── Stage execution helpers ─────────────────────────────────────────────

    /// Run one stage command under a retry policy, recording one history
    /// entry per attempt and backing off between failures.
    async fn run_stage(
        &mut self,
        stage: Stage,
        command: CommandSpec,
        stream: LogStream,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> StageResult {
        let mut attempt = 1;
        loop {
            if self.stop_requested() {
                return StageResult::Stopped;
            }

            let (outcome, detail, duration) =
                self.run_attempt(&command, stream, timeout, attempt).await;
            self.record_attempt(stage, attempt, outcome, duration, detail.clone());

            match outcome {
                StageOutcome::Succeeded => {
                    self.log_info(&format!("{} succeeded on attempt {}", stage, attempt));
                    return StageResult::Success;
                }
                StageOutcome::Stopped => return StageResult::Stopped,
                _ => {}
            }

            if !policy.permits(attempt + 1) {
                let detail = detail.unwrap_or_else(|| format!("{} failed", stage));
                self.log_error(&format!(
                    "{} failed after {} attempt(s): {}",
                    stage, attempt, detail
                ));
                return StageResult::Failed(detail);
            }

            let delay = policy.delay_for_attempt(attempt);
            self.log_warn(&format!(
                "{} attempt {} failed, retrying in {}s",
                stage,
                attempt,
                delay.as_secs()
            ));
            if self.sleep_or_stop(delay).await {
                return StageResult::Stopped;
            }
            attempt += 1;
        }
    }

    /// One attempt: spawn, publish the pid as the job's single active
    /// process handle, wait, clear the handle.
    async fn run_attempt(
        &mut self,
        command: &CommandSpec,
        stream: LogStream,
        timeout: Duration,
        attempt: u32,
    ) -> (StageOutcome, Option<String>, Duration) {
        let started = std::time::Instant::now();

        let proc = match self.runner.spawn(command, stream, attempt) {
            Ok(proc) => proc,
            Err(e) => {
                return (
                    StageOutcome::Failed,
                    Some(format!("spawn failed: {}", e.user_message())),
                    started.elapsed(),
                );
            }
        };

        self.record.write().active_pid = Some(proc.pid());
        let mut stop = self.stop.clone();
        let waited = proc.wait(timeout, &mut stop).await;
        self.record.write().active_pid = None;

        match waited {
            Ok(result) => match result.outcome {
                RunOutcome::Exited { code: 0 } => (StageOutcome::Succeeded, None, started.elapsed()),
                RunOutcome::Exited { code } => (
                    StageOutcome::Failed,
                    Some(format!("exited with code {}: {}", code, result.output_tail(5))),
                    started.elapsed(),
                ),
                RunOutcome::Crashed => (
                    StageOutcome::Failed,
                    Some("process crashed (killed by signal)".to_string()),
                    started.elapsed(),
                ),
                RunOutcome::TimedOut => (
                    StageOutcome::TimedOut,
                    Some(format!("timed out after {}s", timeout.as_secs())),
                    started.elapsed(),
                ),
                RunOutcome::Stopped => (StageOutcome::Stopped, None, started.elapsed()),
            },
            Err(e) => (
                StageOutcome::Failed,
                Some(e.user_message().to_string()),
                started.elapsed(),
            ),
        }
    }

    /// Sleep between attempts, waking early on a stop request. Returns
    /// true when stopped.
    async fn sleep_or_stop(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = self.stop.changed() => match changed {
                    Ok(()) if *self.stop.borrow() => return true,
                    Ok(()) => {}
                    Err(_) => return false,
                },
            }
        }
    }

    fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    // ─── Record bookkeeping ──────────────────────────────────────────────────

    fn begin_stage(&self, stage: Stage) {
        self.record.write().begin_stage(stage);
        self.persist();
        self.log_info(&format!("stage started: {}", stage));
    }

    fn record_attempt(
        &self,
        stage: Stage,
        attempt: u32,
        outcome: StageOutcome,
        duration: Duration,
        detail: Option<String>,
    ) {
        self.record.write().record_attempt(StageRecord {
            stage,
            attempt,
            outcome,
            duration_ms: duration.as_millis() as u64,
            detail,
        });
        self.persist();
    }

    fn persist(&self) {
        let snapshot = self.record.read().clone();
        if let Err(e) = persist_record(&snapshot) {
            tracing::warn!(job = %snapshot.name, error = %e, "failed to persist job record");
        }
    }

    // ─── Logging ─────────────────────────────────────────────────────────────

    fn log_line(&self, level: &str, message: &str) {
        let line = format!(
            "[{}] [{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            level,
            message
        );
        if let Err(e) = self.logs.append(LogStream::App, &line) {
            tracing::warn!(error = %e, "failed to append app log line");
        }
    }

    fn log_info(&self, message: &str) {
        let job = self.record.read().name.clone();
        tracing::info!(job = %job, "{}", message);
        self.log_line("INFO", message);
    }

    fn log_warn(&self, message: &str) {
        let job = self.record.read().name.clone();
        tracing::warn!(job = %job, "{}", message);
        self.log_line("WARN", message);
    }

    fn log_error(&self, message: &str) {
        let job = self.record.read().name.clone();
        tracing::error!(job = %job, "{}", message);
        self.log_line("ERROR", message);
    }

    async fn notify(&self, kind: JobEventKind, message: &str) {
        let (component, version) = {
            let record = self.record.read();
            (record.component.clone(), record.version.clone())
        };
        let event = JobEvent::new(kind, &component, &version, message);
        self.dispatcher.dispatch(&event).await;
    }
}

/// Write the durable sidecar record for one job.
pub(crate) fn persist_record(record: &JobRecord) -> Result<()> {
    std::fs::create_dir_all(&record.config.work_dir)?;
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(record.sidecar_path(), json)?;
    Ok(())
}

/// Does the registry auth file already hold credentials for this registry?
fn auth_file_has_credentials(auth_file: &std::path::Path, registry: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(auth_file) else {
        return false;
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
        return false;
    };
    json.get("auths")
        .and_then(|auths| auths.as_object())
        .map(|auths| {
            auths.contains_key(registry) || auths.contains_key(&format!("https://{}", registry))
        })
        .unwrap_or(false)
}

/// Crash details produced by `run_attempt` for signal deaths.
fn is_crash_detail(detail: &str) -> bool {
    detail.contains("crashed") || detail.contains("spawn failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_file_has_credentials() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"auths": {"cp.icr.io": {"auth": "dXNlcjpwYXNz"}}}"#,
        )
        .unwrap();

        assert!(auth_file_has_credentials(&path, "cp.icr.io"));
        assert!(!auth_file_has_credentials(&path, "other.registry.io"));
        assert!(!auth_file_has_credentials(
            std::path::Path::new("/nonexistent/config.json"),
            "cp.icr.io"
        ));
    }

    #[test]
    fn test_auth_file_https_prefixed_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"auths": {"https://cp.icr.io": {}}}"#).unwrap();
        assert!(auth_file_has_credentials(&path, "cp.icr.io"));
    }

    #[test]
    fn test_is_crash_detail() {
        assert!(is_crash_detail("process crashed (killed by signal)"));
        assert!(is_crash_detail("spawn failed: no such file"));
        assert!(!is_crash_detail("exited with code 1: error"));
    }
}
