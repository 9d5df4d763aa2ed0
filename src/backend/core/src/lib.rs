//! # PakMirror Core
//!
//! Orchestration engine for long-running container-image mirroring
//! jobs. Each job drives external registry/cluster tooling through a
//! fixed pipeline (preflight, authenticate, fetch, generate manifests,
//! mirror) with per-stage retry, streams the tools' output into
//! append-only per-job logs, and exposes lifecycle and live tails over
//! an HTTP API.
//!
//! ## Architecture
//!
//! - **Job Registry**: in-memory + durable index of all jobs; single
//!   authority for state mutation and concurrency control
//! - **Job Supervisor**: one task per active job driving the pipeline
//! - **Process Runner**: external commands with streamed output,
//!   timeout enforcement, and cooperative stop
//! - **Log Aggregator / Stream Broker**: append-only dual log streams
//!   with gap-free replay-then-live fan-out to many subscribers
//! - **Report Generator / Notifications**: terminal-state summary
//!   artifacts and webhook/email lifecycle events

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logs;
pub mod notify;
pub mod observability;
pub mod process;
pub mod report;
pub mod sysinfo;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, MirrorError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, MirrorError, Result};
    pub use crate::jobs::{
        JobId, JobMode, JobRegistry, JobSpec, JobStatus, JobView, RetryOverrides, RetryPolicy,
    };
    pub use crate::logs::{LogStream, StreamBroker};
    pub use crate::notify::NotificationDispatcher;
}
