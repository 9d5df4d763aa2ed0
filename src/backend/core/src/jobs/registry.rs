//! The job registry: the single authority for job creation, lookup,
//! and state mutation across concurrent API access.
//!
//! Each live job is one entry holding the shared record, its log
//! aggregator, progress counters, and the stop channel of the owning
//! supervisor task. Mutating operations serialize on the record's
//! write lock, so of two racing calls the second observes the first's
//! transition and fails with `InvalidStateTransition`.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{MirrorError, Result};
use crate::logs::{JobLogs, LogStream, ProgressTracker, StreamBroker, Subscription};
use crate::notify::NotificationDispatcher;

use super::record::{ConfigSnapshot, JobId, JobRecord, JobSpec, JobStatus, StageRecord};
use super::supervisor::{persist_record, Supervisor};

/// One live job: shared state between the registry, the owning
/// supervisor, and read-only API access.
pub struct JobEntry {
    pub record: Arc<RwLock<JobRecord>>,
    pub logs: Arc<JobLogs>,
    pub progress: Arc<ProgressTracker>,
    /// Sender half of the owning supervisor's stop signal.
    stop: Mutex<watch::Sender<bool>>,
}

/// Overrides merged into the original config snapshot on retry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryOverrides {
    pub final_registry: Option<String>,
    pub registry_auth_file: Option<PathBuf>,
    pub entitlement_key: Option<String>,
    pub filter: Option<String>,
    pub max_per_registry: Option<u32>,
}

impl RetryOverrides {
    fn apply(&self, config: &mut ConfigSnapshot) {
        if let Some(registry) = &self.final_registry {
            config.final_registry = registry.clone();
        }
        if let Some(auth_file) = &self.registry_auth_file {
            config.registry_auth_file = auth_file.clone();
        }
        if let Some(key) = &self.entitlement_key {
            config.entitlement_key = Some(key.clone());
        }
        if let Some(filter) = &self.filter {
            config.filter = Some(filter.clone());
        }
        if let Some(max) = self.max_per_registry {
            config.max_per_registry = max;
        }
    }
}

/// Serializable snapshot of one job for API consumers.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub component: String,
    pub version: String,
    pub name: String,
    pub mode: String,
    pub status: JobStatus,
    pub dismissed: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub retry_count: u32,
    pub total_images: u64,
    pub completed_images: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    pub stage_history: Vec<StageRecord>,
    pub work_dir: String,
}

/// Jobs partitioned the way list callers consume them.
#[derive(Debug, Clone, Serialize)]
pub struct JobList {
    pub active: Vec<JobView>,
    pub history: Vec<JobView>,
}

/// In-memory index of all jobs, backed by one durable sidecar record
/// per job for restart recovery.
pub struct JobRegistry {
    config: Arc<Config>,
    jobs: DashMap<Uuid, Arc<JobEntry>>,
    /// Serializes name-uniqueness validation against concurrent creates.
    create_lock: Mutex<()>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    broker: StreamBroker,
}

impl JobRegistry {
    pub fn new(config: Arc<Config>, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            config,
            jobs: DashMap::new(),
            create_lock: Mutex::new(()),
            dispatcher,
            broker: StreamBroker::new(),
        }
    }

    /// Restore bookkeeping from sidecar records found under the home
    /// directory. Jobs that were mid-pipeline when the server died are
    /// restored as failed; their external processes died with us.
    pub fn recover(&self) -> Result<usize> {
        let home = &self.config.mirror.home_dir;
        std::fs::create_dir_all(home)?;

        let mut recovered = 0;
        for dir_entry in std::fs::read_dir(home)? {
            let dir_entry = dir_entry?;
            let sidecar = dir_entry.path().join("job.json");
            if !sidecar.is_file() {
                continue;
            }

            let mut record: JobRecord = match std::fs::read_to_string(&sidecar)
                .map_err(MirrorError::from)
                .and_then(|json| serde_json::from_str(&json).map_err(MirrorError::from))
            {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(path = %sidecar.display(), error = %e, "skipping unreadable job record");
                    continue;
                }
            };

            if !record.status.is_terminal() {
                record.mark_failed("interrupted by server restart");
                if let Err(e) = persist_record(&record) {
                    tracing::warn!(job = %record.name, error = %e, "failed to persist recovered record");
                }
            }

            let logs = JobLogs::open(&record.config.work_dir, &record.name)?;
            let progress = ProgressTracker::new();
            progress.set_total(record.total_images);
            progress.set_completed(record.completed_images);

            let (stop_tx, _stop_rx) = watch::channel(false);
            let entry = Arc::new(JobEntry {
                record: Arc::new(RwLock::new(record)),
                logs: Arc::new(logs),
                progress: Arc::new(progress),
                stop: Mutex::new(stop_tx),
            });
            let id = entry.record.read().id.0;
            self.jobs.insert(id, entry);
            recovered += 1;
        }

        if recovered > 0 {
            tracing::info!(recovered, "recovered job records from disk");
        }
        Ok(recovered)
    }

    /// Create a job and start its supervisor. Fails on an invalid spec
    /// or when a non-dismissed job already holds the name.
    pub fn create(&self, spec: JobSpec) -> Result<JobView> {
        spec.validate()?;

        let _guard = self.create_lock.lock();
        let name_taken = self.jobs.iter().any(|entry| {
            let record = entry.value().record.read();
            record.name == spec.name && !record.dismissed
        });
        if name_taken {
            return Err(MirrorError::duplicate_name(&spec.name));
        }

        let snapshot = ConfigSnapshot::from_spec(&spec, &self.config.mirror);
        let record = JobRecord::new(&spec, snapshot);
        persist_record(&record)?;

        let logs = Arc::new(JobLogs::open(&record.config.work_dir, &record.name)?);
        let progress = Arc::new(ProgressTracker::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let id = record.id;

        let entry = Arc::new(JobEntry {
            record: Arc::new(RwLock::new(record)),
            logs: logs.clone(),
            progress: progress.clone(),
            stop: Mutex::new(stop_tx),
        });
        self.jobs.insert(id.0, entry.clone());

        Supervisor::spawn(
            entry.record.clone(),
            logs,
            progress,
            stop_rx,
            self.dispatcher.clone(),
            &self.config,
        );

        tracing::info!(job_id = %id, name = %entry.record.read().name, "job created");
        Ok(self.view_of(&entry))
    }

    /// Immutable snapshot of one job.
    pub fn get(&self, id: Uuid) -> Result<JobView> {
        let entry = self.entry(id)?;
        Ok(self.view_of(&entry))
    }

    /// All jobs, partitioned into active (non-terminal) and history
    /// (terminal, including dismissed), newest first.
    pub fn list(&self) -> JobList {
        let mut active = Vec::new();
        let mut history = Vec::new();
        for entry in self.jobs.iter() {
            let view = self.view_of(entry.value());
            if view.status.is_terminal() {
                history.push(view);
            } else {
                active.push(view);
            }
        }
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        JobList { active, history }
    }

    /// Signal the owning supervisor to terminate the active process.
    /// The job transitions to `stopped` only once that process has
    /// actually exited.
    pub fn request_stop(&self, id: Uuid) -> Result<JobView> {
        let entry = self.entry(id)?;
        {
            let record = entry.record.read();
            if record.status.is_terminal() {
                return Err(MirrorError::invalid_transition("stop", record.status));
            }
        }
        let _ = entry.stop.lock().send(true);
        tracing::info!(job_id = %id, "stop requested");
        Ok(self.view_of(&entry))
    }

    /// Dismiss a terminal job from active views. Idempotent.
    pub fn dismiss(&self, id: Uuid) -> Result<JobView> {
        let entry = self.entry(id)?;
        {
            let mut record = entry.record.write();
            record.dismiss()?;
            persist_record(&record)?;
        }
        Ok(self.view_of(&entry))
    }

    /// Start a new attempt of a failed job, preserving its identity and
    /// working directory.
    pub fn retry(&self, id: Uuid, overrides: RetryOverrides) -> Result<JobView> {
        let entry = self.entry(id)?;
        let stop_rx = {
            let mut record = entry.record.write();
            record.reset_for_retry()?;
            overrides.apply(&mut record.config);
            persist_record(&record)?;

            // Fresh stop channel for the new supervisor; the previous
            // attempt's signal must not leak into this one.
            let (stop_tx, stop_rx) = watch::channel(false);
            *entry.stop.lock() = stop_tx;
            stop_rx
        };

        Supervisor::spawn(
            entry.record.clone(),
            entry.logs.clone(),
            entry.progress.clone(),
            stop_rx,
            self.dispatcher.clone(),
            &self.config,
        );

        tracing::info!(job_id = %id, "retry started");
        Ok(self.view_of(&entry))
    }

    /// Log snapshot for one job.
    pub fn read_log(&self, id: Uuid, stream: LogStream, tail: Option<usize>) -> Result<Vec<String>> {
        let entry = self.entry(id)?;
        entry.logs.read_all(stream, tail)
    }

    /// Live log subscription for one job.
    pub fn subscribe_log(
        &self,
        id: Uuid,
        stream: LogStream,
        from_start: bool,
    ) -> Result<Subscription> {
        let entry = self.entry(id)?;
        self.broker.subscribe(&entry.logs, stream, from_start)
    }

    /// The report path for a terminal job; `JobNotFound` before the
    /// report exists.
    pub fn report_path(&self, id: Uuid) -> Result<PathBuf> {
        let entry = self.entry(id)?;
        let path = entry.record.read().report_path();
        if !path.is_file() {
            return Err(MirrorError::job_not_found(format!("report for job {}", id)));
        }
        Ok(path)
    }

    /// The generated mapping file for a job, if the pipeline got far
    /// enough to produce one.
    pub fn manifest_path(&self, id: Uuid) -> Result<PathBuf> {
        let entry = self.entry(id)?;
        let record = entry.record.read();
        let path = super::stages::StageCommands::mapping_file(&record);
        if !path.is_file() {
            return Err(MirrorError::job_not_found(format!("manifest for job {}", id)));
        }
        Ok(path)
    }

    fn entry(&self, id: Uuid) -> Result<Arc<JobEntry>> {
        self.jobs
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| MirrorError::job_not_found(id))
    }

    fn view_of(&self, entry: &JobEntry) -> JobView {
        let record = entry.record.read();
        let completed = entry.progress.completed().max(record.completed_images);
        let total = entry.progress.total().max(record.total_images);
        let percent = if total > 0 {
            Some((((completed * 100) / total).min(100)) as u8)
        } else {
            None
        };
        JobView {
            id: record.id,
            component: record.component.clone(),
            version: record.version.clone(),
            name: record.name.clone(),
            mode: record.mode.to_string(),
            status: record.status,
            dismissed: record.dismissed,
            created_at: record.created_at,
            started_at: record.started_at,
            ended_at: record.ended_at,
            retry_count: record.retry_count,
            total_images: total,
            completed_images: completed,
            percent,
            active_pid: record.active_pid,
            failure_detail: record.failure_detail.clone(),
            stage_history: record.stage_history.clone(),
            work_dir: record.config.work_dir.display().to_string(),
        }
    }
}
