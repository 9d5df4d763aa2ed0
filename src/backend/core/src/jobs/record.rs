//! Job data model.
//!
//! A [`JobRecord`] is one mirroring request: its identity, frozen
//! configuration snapshot, lifecycle status, and per-attempt stage history.
//! Records are mutated only by the owning supervisor task (single-writer
//! discipline); every other component reads cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::MirrorConfig;
use crate::error::{MirrorError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Mode
// ═══════════════════════════════════════════════════════════════════════════════

/// How a job mirrors its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Full pipeline, images mirrored to the local filesystem
    Standard,
    /// Full pipeline restricted by a manifest filter pattern
    Selective,
    /// Resume mirroring from a previously generated mapping file
    UpdateExisting,
    /// Mirror source-to-target registry without local image storage
    DirectToRegistry,
    /// Full pipeline with the mirror tool in dry-run mode
    DryRun,
}

impl Default for JobMode {
    fn default() -> Self {
        Self::Standard
    }
}

impl JobMode {
    /// Whether the mirror stage runs with the dry-run flag.
    pub fn is_dry_run(&self) -> bool {
        matches!(self, Self::DryRun)
    }

    /// Whether images land on the local filesystem (requires disk space).
    pub fn needs_local_storage(&self) -> bool {
        !matches!(self, Self::DirectToRegistry)
    }

    /// Whether the fetch and manifest stages run at all.
    pub fn generates_manifests(&self) -> bool {
        !matches!(self, Self::UpdateExisting)
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Selective => write!(f, "selective"),
            Self::UpdateExisting => write!(f, "update_existing"),
            Self::DirectToRegistry => write!(f, "direct_to_registry"),
            Self::DryRun => write!(f, "dry_run"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Status
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a job.
///
/// Transitions are monotonic along the pipeline; `Failed` and `Stopped`
/// are reachable from any non-terminal status. The only path back to a
/// running state is an explicit retry, which resets history but keeps
/// the job's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, preflight not yet passed
    Pending,
    /// Logging in to the source registry
    Authenticating,
    /// Retrieving the versioned package
    Fetching,
    /// Producing the image mapping
    GeneratingManifests,
    /// The long-running image transfer
    Mirroring,
    /// Terminal: full pipeline success
    Completed,
    /// Terminal: a stage exhausted its retries
    Failed,
    /// Terminal: stopped by request
    Stopped,
}

impl JobStatus {
    /// Check if the job reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    /// Check if the job can be retried from this status.
    pub fn can_retry(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Fetching => write!(f, "fetching"),
            Self::GeneratingManifests => write!(f, "generating_manifests"),
            Self::Mirroring => write!(f, "mirroring"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pipeline Stages
// ═══════════════════════════════════════════════════════════════════════════════

/// One step of the mirroring pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preflight,
    Authenticate,
    Fetch,
    GenerateManifests,
    Mirror,
}

impl Stage {
    /// The job status displayed while this stage runs.
    pub fn running_status(&self) -> JobStatus {
        match self {
            Self::Preflight => JobStatus::Pending,
            Self::Authenticate => JobStatus::Authenticating,
            Self::Fetch => JobStatus::Fetching,
            Self::GenerateManifests => JobStatus::GeneratingManifests,
            Self::Mirror => JobStatus::Mirroring,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preflight => write!(f, "preflight"),
            Self::Authenticate => write!(f, "authenticate"),
            Self::Fetch => write!(f, "fetch"),
            Self::GenerateManifests => write!(f, "generate_manifests"),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

/// Outcome of one attempt of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    Failed,
    TimedOut,
    /// Failed, but the pipeline continued via a fallback (fetch-from-cache)
    Warning,
    /// Interrupted by a stop request
    Stopped,
    /// Not attempted: skipped with existing credentials or by mode
    Skipped,
}

/// One entry of a job's stage history. One entry per attempt, appended
/// in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    /// 1-based attempt number within the stage
    pub attempt: u32,
    pub outcome: StageOutcome,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Specification
// ═══════════════════════════════════════════════════════════════════════════════

/// A job creation request, validated once before any process is spawned.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    /// Component (package) to mirror
    pub component: String,
    /// Component version
    pub version: String,
    /// Human label; also the working directory name. Unique among
    /// non-dismissed jobs.
    pub name: String,
    #[serde(default)]
    pub mode: JobMode,
    /// Manifest filter pattern (required in selective mode)
    #[serde(default)]
    pub filter: Option<String>,
    /// Override for the configured target registry
    #[serde(default)]
    pub final_registry: Option<String>,
    /// Override for the configured registry auth file
    #[serde(default)]
    pub registry_auth_file: Option<PathBuf>,
    /// Override for the configured entitlement key; never logged
    #[serde(default, skip_serializing)]
    pub entitlement_key: Option<String>,
}

impl JobSpec {
    /// Validate the spec. Rejections happen here, before any side effect.
    pub fn validate(&self) -> Result<()> {
        if self.component.trim().is_empty() {
            return Err(MirrorError::invalid_spec("component must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(MirrorError::invalid_spec("version must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(MirrorError::invalid_spec("name must not be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(MirrorError::invalid_spec(
                "name may only contain alphanumerics, '-', '_' and '.'",
            ));
        }
        if self.name.starts_with('.') {
            return Err(MirrorError::invalid_spec("name must not start with '.'"));
        }
        if self.mode == JobMode::Selective && self.filter.as_deref().unwrap_or("").is_empty() {
            return Err(MirrorError::invalid_spec(
                "selective mode requires a filter pattern",
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Config Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// Effective configuration frozen into the job at creation time.
///
/// The entitlement key lives only in memory; it is excluded from the
/// durable sidecar and every serialized view, so a retried job after a
/// server restart falls back to the configured key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub home_dir: PathBuf,
    pub work_dir: PathBuf,
    pub source_registry: String,
    pub final_registry: String,
    pub registry_auth_file: PathBuf,
    #[serde(skip)]
    pub entitlement_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    pub min_disk_space_gb: u64,
    pub max_per_registry: u32,
}

impl ConfigSnapshot {
    /// Merge per-job overrides over the service configuration.
    pub fn from_spec(spec: &JobSpec, config: &MirrorConfig) -> Self {
        Self {
            home_dir: config.home_dir.clone(),
            work_dir: config.home_dir.join(&spec.name),
            source_registry: config.source_registry.clone(),
            final_registry: spec
                .final_registry
                .clone()
                .unwrap_or_else(|| config.final_registry.clone()),
            registry_auth_file: spec
                .registry_auth_file
                .clone()
                .unwrap_or_else(|| config.registry_auth_file.clone()),
            entitlement_key: spec
                .entitlement_key
                .clone()
                .or_else(|| config.entitlement_key.clone()),
            filter: spec.filter.clone(),
            min_disk_space_gb: config.min_disk_space_gb,
            max_per_registry: config.max_per_registry,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// The durable record of one mirroring job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub component: String,
    pub version: String,
    pub name: String,
    pub mode: JobMode,
    pub config: ConfigSnapshot,
    pub status: JobStatus,
    /// Dismissed jobs disappear from active views but stay in history
    #[serde(default)]
    pub dismissed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// PID of the live external process, if any. At most one per job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_pid: Option<u32>,
    #[serde(default)]
    pub stage_history: Vec<StageRecord>,
    #[serde(default)]
    pub retry_count: u32,
    /// Best-effort counters derived from the mapping file and the mirror
    /// stream's progress markers; markers may recur, so these are
    /// estimates for display only.
    #[serde(default)]
    pub total_images: u64,
    #[serde(default)]
    pub completed_images: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

impl JobRecord {
    /// Create a fresh record in `Pending` status.
    pub fn new(spec: &JobSpec, config: ConfigSnapshot) -> Self {
        Self {
            id: JobId::new(),
            component: spec.component.clone(),
            version: spec.version.clone(),
            name: spec.name.clone(),
            mode: spec.mode,
            config,
            status: JobStatus::Pending,
            dismissed: false,
            created_at: Utc::now(),
            stage_started_at: None,
            started_at: None,
            ended_at: None,
            active_pid: None,
            stage_history: Vec::new(),
            retry_count: 0,
            total_images: 0,
            completed_images: 0,
            failure_detail: None,
        }
    }

    /// Mark the start of pipeline execution for this attempt.
    pub fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Enter a pipeline stage.
    pub fn begin_stage(&mut self, stage: Stage) {
        self.status = stage.running_status();
        self.stage_started_at = Some(Utc::now());
    }

    /// Append one attempt record.
    pub fn record_attempt(&mut self, record: StageRecord) {
        self.stage_history.push(record);
    }

    /// Terminal success.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.ended_at = Some(Utc::now());
        self.active_pid = None;
    }

    /// Terminal failure.
    pub fn mark_failed(&mut self, detail: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.failure_detail = Some(detail.into());
        self.ended_at = Some(Utc::now());
        self.active_pid = None;
    }

    /// Terminal stop. Only recorded after the external process has exited.
    pub fn mark_stopped(&mut self) {
        self.status = JobStatus::Stopped;
        self.ended_at = Some(Utc::now());
        self.active_pid = None;
    }

    /// Dismiss the job. Legal only from a terminal status; idempotent.
    pub fn dismiss(&mut self) -> Result<()> {
        if !self.status.is_terminal() {
            return Err(MirrorError::invalid_transition("dismiss", self.status));
        }
        self.dismissed = true;
        Ok(())
    }

    /// Reset the record for a new attempt. Identity, working directory
    /// and log files are preserved; history belongs to the new attempt.
    pub fn reset_for_retry(&mut self) -> Result<()> {
        if !self.status.can_retry() {
            return Err(MirrorError::invalid_transition("retry", self.status));
        }
        self.status = JobStatus::Pending;
        self.dismissed = false;
        self.stage_history.clear();
        self.failure_detail = None;
        self.stage_started_at = None;
        self.started_at = None;
        self.ended_at = None;
        self.active_pid = None;
        self.completed_images = 0;
        self.retry_count += 1;
        Ok(())
    }

    /// Wall-clock duration of the attempt, if it has both endpoints.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Path of the durable sidecar record.
    pub fn sidecar_path(&self) -> PathBuf {
        self.config.work_dir.join("job.json")
    }

    /// Path of the terminal-state summary report.
    pub fn report_path(&self) -> PathBuf {
        self.config
            .work_dir
            .join(format!("{}-summary-report.txt", self.name))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> JobSpec {
        JobSpec {
            component: "platform-navigator".into(),
            version: "7.3.2".into(),
            name: "pn-7.3.2".into(),
            ..Default::default()
        }
    }

    fn sample_record() -> JobRecord {
        let spec = sample_spec();
        let config = ConfigSnapshot::from_spec(&spec, &MirrorConfig::default());
        JobRecord::new(&spec, config)
    }

    #[test]
    fn test_status_terminality() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Stopped.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Mirroring.is_terminal());
        assert!(JobStatus::Failed.can_retry());
        assert!(!JobStatus::Completed.can_retry());
    }

    #[test]
    fn test_spec_validation() {
        assert!(sample_spec().validate().is_ok());

        let mut spec = sample_spec();
        spec.name = "has spaces".into();
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.component = "".into();
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.mode = JobMode::Selective;
        assert!(spec.validate().is_err());
        spec.filter = Some(".*management.*".into());
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_dismiss_requires_terminal_status() {
        let mut record = sample_record();
        record.begin_stage(Stage::Mirror);
        let err = record.dismiss().unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ErrorCode::InvalidStateTransition
        );

        record.mark_completed();
        assert!(record.dismiss().is_ok());
        // Idempotent on repeat.
        assert!(record.dismiss().is_ok());
        assert!(record.dismissed);
    }

    #[test]
    fn test_retry_resets_history_but_keeps_identity() {
        let mut record = sample_record();
        let id = record.id;
        record.begin_stage(Stage::Authenticate);
        record.record_attempt(StageRecord {
            stage: Stage::Authenticate,
            attempt: 1,
            outcome: StageOutcome::Failed,
            duration_ms: 12,
            detail: None,
        });
        record.mark_failed("authentication failed after 3 attempts");

        record.reset_for_retry().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.status, JobStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert!(record.stage_history.is_empty());
        assert!(record.failure_detail.is_none());
    }

    #[test]
    fn test_retry_illegal_from_completed() {
        let mut record = sample_record();
        record.mark_completed();
        assert!(record.reset_for_retry().is_err());
    }

    #[test]
    fn test_sidecar_excludes_entitlement_key() {
        let mut spec = sample_spec();
        spec.entitlement_key = Some("super-secret".into());
        let config = ConfigSnapshot::from_spec(&spec, &MirrorConfig::default());
        let record = JobRecord::new(&spec, config);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("super-secret"));
    }

    #[test]
    fn test_stage_running_status() {
        assert_eq!(Stage::Authenticate.running_status(), JobStatus::Authenticating);
        assert_eq!(Stage::Mirror.running_status(), JobStatus::Mirroring);
        assert_eq!(Stage::Preflight.running_status(), JobStatus::Pending);
    }
}
