//! API request handlers with proper error propagation.
//!
//! All handlers return `Result<impl IntoResponse, MirrorError>` so that
//! errors are converted to appropriate HTTP status codes via the
//! `IntoResponse` implementation on `MirrorError`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::error::MirrorError;
use crate::jobs::{JobSpec, RetryOverrides};
use crate::logs::LogStream;
use crate::sysinfo;

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handlers
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn create_job(
    State(state): State<AppState>,
    Json(spec): Json<JobSpec>,
) -> Result<impl IntoResponse, MirrorError> {
    let view = state.registry.create(spec)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

pub async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.registry.list()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, MirrorError> {
    let view = state.registry.get(id)?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, MirrorError> {
    let view = state.registry.request_stop(id)?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn dismiss_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, MirrorError> {
    let view = state.registry.dismiss(id)?;
    Ok(Json(ApiResponse::success(view)))
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    overrides: Option<Json<RetryOverrides>>,
) -> Result<impl IntoResponse, MirrorError> {
    let overrides = overrides.map(|Json(o)| o).unwrap_or_default();
    let view = state.registry.retry(id, overrides)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Logs, Reports, Manifests
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct LogQuery {
    /// `app` or `mirror`
    #[serde(default = "default_stream")]
    pub stream: String,
    /// Return only the last N lines
    pub lines: Option<usize>,
}

fn default_stream() -> String {
    "app".to_string()
}

pub(super) fn parse_stream(name: &str) -> Result<LogStream, MirrorError> {
    LogStream::parse(name).ok_or_else(|| {
        MirrorError::invalid_spec(format!("unknown log stream '{}', expected app|mirror", name))
    })
}

pub async fn log_snapshot(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, MirrorError> {
    let stream = parse_stream(&query.stream)?;
    let lines = state.registry.read_log(id, stream, query.lines)?;
    Ok(lines.join("\n"))
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, MirrorError> {
    let path = state.registry.report_path(id)?;
    let content = std::fs::read_to_string(path)?;
    Ok(content)
}

pub async fn get_manifest(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, MirrorError> {
    let path = state.registry.manifest_path(id)?;
    let content = std::fs::read_to_string(path)?;
    Ok(content)
}

// ═══════════════════════════════════════════════════════════════════════════════
// System
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn system_info(State(state): State<AppState>) -> impl IntoResponse {
    let home = &state.config.mirror.home_dir;
    let available_gb = sysinfo::available_disk_gb(home).ok();
    let tools = sysinfo::probe_tools([
        state.config.tools.cluster_cli.as_str(),
        state.config.tools.registry_cli.as_str(),
    ]);

    Json(ApiResponse::success(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "home_dir": home.display().to_string(),
        "available_disk_gb": available_gb,
        "min_disk_space_gb": state.config.mirror.min_disk_space_gb,
        "tools": tools,
    })))
}

pub async fn validate_prerequisites(State(state): State<AppState>) -> impl IntoResponse {
    let tools = sysinfo::probe_tools([
        state.config.tools.cluster_cli.as_str(),
        state.config.tools.registry_cli.as_str(),
    ]);
    let missing: Vec<&str> = tools
        .iter()
        .filter(|t| !t.available)
        .map(|t| t.name.as_str())
        .collect();

    let disk_ok = sysinfo::available_disk_gb(&state.config.mirror.home_dir)
        .map(|gb| gb >= state.config.mirror.min_disk_space_gb)
        .unwrap_or(false);

    Json(ApiResponse::success(serde_json::json!({
        "valid": missing.is_empty() && disk_ok,
        "missing_tools": missing,
        "disk_space_ok": disk_ok,
    })))
}

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.config.redacted_view()))
}
