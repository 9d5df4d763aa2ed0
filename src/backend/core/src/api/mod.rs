//! HTTP API for PakMirror.
//!
//! REST endpoints under `/api/v1/` plus an unversioned health check.
//! Live log tailing is served as a server-sent event stream; everything
//! else is JSON in a `{success, data | error, error_code}` envelope.

mod handlers;
mod stream;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::jobs::JobRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub config: Arc<Config>,
}

/// Build the API router.
///
/// # Endpoints
///
/// ## Jobs
/// - `POST /api/v1/jobs` - Create a job
/// - `GET /api/v1/jobs` - List jobs (active + history)
/// - `GET /api/v1/jobs/:id` - Get one job
/// - `DELETE /api/v1/jobs/:id` - Request stop
/// - `PATCH /api/v1/jobs/:id` - Dismiss
/// - `POST /api/v1/jobs/:id/retry` - Start a new attempt
/// - `GET /api/v1/jobs/:id/logs` - Log snapshot
/// - `GET /api/v1/jobs/:id/logs/stream` - Live log tail (SSE)
/// - `GET /api/v1/jobs/:id/report` - Terminal-state summary report
/// - `GET /api/v1/jobs/:id/manifest` - Generated image mapping
///
/// ## System
/// - `GET /api/v1/system/info` - Disk space and tool availability
/// - `POST /api/v1/system/validate` - Prerequisite validation
/// - `GET /api/v1/config` - Redacted configuration view
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

fn v1_router() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(handlers::create_job).get(handlers::list_jobs))
        .route(
            "/jobs/:id",
            get(handlers::get_job)
                .delete(handlers::stop_job)
                .patch(handlers::dismiss_job),
        )
        .route("/jobs/:id/retry", post(handlers::retry_job))
        .route("/jobs/:id/logs", get(handlers::log_snapshot))
        .route("/jobs/:id/logs/stream", get(stream::stream_log))
        .route("/jobs/:id/report", get(handlers::get_report))
        .route("/jobs/:id/manifest", get(handlers::get_manifest))
        .route("/system/info", get(handlers::system_info))
        .route("/system/validate", post(handlers::validate_prerequisites))
        .route("/config", get(handlers::get_config))
}

/// API response wrapper.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_response_success() {
        let response = ApiResponse::success("test data");
        assert!(response.success);
        assert_eq!(response.data, Some("test data"));
        assert!(response.error.is_none());
    }
}
