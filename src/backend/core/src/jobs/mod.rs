//! Job orchestration.
//!
//! This module is the heart of PakMirror:
//!
//! - **record**: the `JobRecord` data model and its state machine
//! - **retry**: the exponential-backoff retry policy
//! - **stages**: external-tool invocations for each pipeline stage
//! - **supervisor**: the per-job task driving the pipeline
//! - **registry**: the single authority for creation, lookup, and
//!   concurrency control across all jobs
//!
//! Exactly one supervisor task owns a job at a time, and a job has at
//! most one live external process at any instant.

mod record;
mod registry;
mod retry;
mod stages;
mod supervisor;

pub use record::{
    ConfigSnapshot, JobId, JobMode, JobRecord, JobSpec, JobStatus, Stage, StageOutcome,
    StageRecord,
};
pub use registry::{JobList, JobRegistry, JobView, RetryOverrides};
pub use retry::RetryPolicy;
pub use stages::StageCommands;
pub use supervisor::Supervisor;
