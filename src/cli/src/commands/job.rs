//! Job management commands.
//!
//! Provides create, list, get, stop, dismiss, retry, report, and
//! manifest operations for mirroring jobs.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Create a new mirroring job
    Create {
        /// Component (package) to mirror
        #[arg(short, long)]
        component: String,

        /// Component version
        #[arg(short, long)]
        version: String,

        /// Job name (also the working directory name)
        #[arg(short, long)]
        name: String,

        /// Job mode (standard, selective, update_existing, direct_to_registry, dry_run)
        #[arg(short, long, default_value = "standard")]
        mode: String,

        /// Manifest filter pattern (selective mode)
        #[arg(long)]
        filter: Option<String>,

        /// Target registry override
        #[arg(long)]
        final_registry: Option<String>,

        /// Entitlement key (prefer PAKMIRROR__MIRROR__ENTITLEMENT_KEY on the server)
        #[arg(long, env = "PAKMIRROR_ENTITLEMENT_KEY", hide_env_values = true)]
        entitlement_key: Option<String>,
    },

    /// List jobs (active and history)
    List {
        /// Show only active jobs
        #[arg(long)]
        active: bool,
    },

    /// Get one job
    Get {
        /// Job ID
        job_id: Uuid,
    },

    /// Stop a running job
    Stop {
        /// Job ID
        job_id: Uuid,
    },

    /// Dismiss a terminal job from active views
    Dismiss {
        /// Job ID
        job_id: Uuid,
    },

    /// Start a new attempt of a failed job
    Retry {
        /// Job ID
        job_id: Uuid,

        /// Target registry override for the new attempt
        #[arg(long)]
        final_registry: Option<String>,

        /// Entitlement key override for the new attempt
        #[arg(long, env = "PAKMIRROR_ENTITLEMENT_KEY", hide_env_values = true)]
        entitlement_key: Option<String>,
    },

    /// Print the terminal-state summary report
    Report {
        /// Job ID
        job_id: Uuid,
    },

    /// Print the generated image mapping
    Manifest {
        /// Job ID
        job_id: Uuid,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CreateJobRequest {
    component: String,
    version: String,
    name: String,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entitlement_key: Option<String>,
}

#[derive(Serialize)]
struct RetryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    final_registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    entitlement_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub component: String,
    pub version: String,
    pub name: String,
    pub mode: String,
    pub status: String,
    #[serde(default)]
    pub dismissed: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub total_images: u64,
    #[serde(default)]
    pub completed_images: u64,
    #[serde(default)]
    pub percent: Option<u8>,
    #[serde(default)]
    pub failure_detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobListResponse {
    active: Vec<JobInfo>,
    history: Vec<JobInfo>,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Progress")]
    progress: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<JobInfo> for JobRow {
    fn from(job: JobInfo) -> Self {
        let progress = match job.percent {
            Some(p) => format!("{}/{} ({}%)", job.completed_images, job.total_images, p),
            None => "-".to_string(),
        };
        let created = job
            .created_at
            .parse::<chrono::DateTime<chrono::Utc>>()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or(job.created_at);
        Self {
            id: job.id.to_string()[..8].to_string(),
            name: job.name,
            component: job.component,
            version: job.version,
            mode: job.mode,
            status: output::colorize_status(&job.status),
            progress,
            created,
        }
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Create {
            component,
            version,
            name,
            mode,
            filter,
            final_registry,
            entitlement_key,
        } => {
            let body = CreateJobRequest {
                component,
                version,
                name,
                mode,
                filter,
                final_registry,
                entitlement_key,
            };
            let job: JobInfo = client.post("/api/v1/jobs", &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success("Job created");
                    output::print_detail("ID", &job.id.to_string());
                    output::print_detail("Name", &job.name);
                    output::print_detail("Status", &job.status);
                }
                _ => output::print_item(&job, format),
            }
        }

        JobCommands::List { active } => {
            let list: JobListResponse = client.get("/api/v1/jobs").await?;
            let jobs = if active {
                list.active
            } else {
                list.active.into_iter().chain(list.history).collect()
            };
            let rows: Vec<JobRow> = jobs.into_iter().map(JobRow::from).collect();
            output::print_list(&rows, format);
        }

        JobCommands::Get { job_id } => {
            let job: JobInfo = client.get(&format!("/api/v1/jobs/{}", job_id)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Job: {}", job.name));
                    output::print_detail("ID", &job.id.to_string());
                    output::print_detail("Component", &job.component);
                    output::print_detail("Version", &job.version);
                    output::print_detail("Mode", &job.mode);
                    output::print_detail("Status", &output::colorize_status(&job.status));
                    output::print_detail("Retries", &job.retry_count.to_string());
                    output::print_detail(
                        "Progress",
                        &format!("{}/{}", job.completed_images, job.total_images),
                    );
                    if let Some(detail) = &job.failure_detail {
                        output::print_detail("Failure", detail);
                    }
                }
                _ => output::print_item(&job, format),
            }
        }

        JobCommands::Stop { job_id } => {
            let job: JobInfo = client.delete(&format!("/api/v1/jobs/{}", job_id)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Stop requested for job {}", job.name));
                }
                _ => output::print_item(&job, format),
            }
        }

        JobCommands::Dismiss { job_id } => {
            let job: JobInfo = client.patch(&format!("/api/v1/jobs/{}", job_id)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Job {} dismissed", job.name));
                }
                _ => output::print_item(&job, format),
            }
        }

        JobCommands::Retry {
            job_id,
            final_registry,
            entitlement_key,
        } => {
            let body = RetryRequest {
                final_registry,
                entitlement_key,
            };
            let job: JobInfo = client
                .post(&format!("/api/v1/jobs/{}/retry", job_id), &body)
                .await?;
            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Retry started for job {} (attempt {})",
                        job.name,
                        job.retry_count + 1
                    ));
                }
                _ => output::print_item(&job, format),
            }
        }

        JobCommands::Report { job_id } => {
            let report = client
                .get_text(&format!("/api/v1/jobs/{}/report", job_id))
                .await?;
            println!("{}", report);
        }

        JobCommands::Manifest { job_id } => {
            let manifest = client
                .get_text(&format!("/api/v1/jobs/{}/manifest", job_id))
                .await?;
            println!("{}", manifest);
        }
    }

    Ok(())
}
