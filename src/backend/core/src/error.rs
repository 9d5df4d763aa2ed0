//! Error handling for PakMirror core.
//!
//! This module provides:
//! - A stable, machine-readable `ErrorCode` taxonomy for API clients
//! - HTTP status code mapping for API responses
//! - Retryability classification used by the pipeline supervisor
//! - User-facing messages vs detailed internal messages
//! - Error logging with tracing integration

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for PakMirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Job lifecycle errors (1000-1099)
    InvalidSpec,
    DuplicateName,
    JobNotFound,
    InvalidStateTransition,

    // Preflight errors (1100-1199)
    PrerequisiteMissing,
    DiskSpaceInsufficient,

    // Pipeline errors (1200-1299)
    AuthenticationFailure,
    SubprocessNonZeroExit,
    SubprocessTimedOut,
    SubprocessSpawnFailed,
    ManifestMissing,

    // Infrastructure errors (2000-2099)
    Io,
    SerializationError,
    ConfigurationError,
    NotificationFailed,

    // Internal errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::InvalidSpec => 1000,
            Self::DuplicateName => 1001,
            Self::JobNotFound => 1002,
            Self::InvalidStateTransition => 1003,

            Self::PrerequisiteMissing => 1100,
            Self::DiskSpaceInsufficient => 1101,

            Self::AuthenticationFailure => 1200,
            Self::SubprocessNonZeroExit => 1201,
            Self::SubprocessTimedOut => 1202,
            Self::SubprocessSpawnFailed => 1203,
            Self::ManifestMissing => 1204,

            Self::Io => 2000,
            Self::SerializationError => 2001,
            Self::ConfigurationError => 2002,
            Self::NotificationFailed => 2003,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Bad Request (400)
            Self::InvalidSpec => StatusCode::BAD_REQUEST,

            // Not Found (404)
            Self::JobNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::DuplicateName | Self::InvalidStateTransition => StatusCode::CONFLICT,

            // Preconditions (412)
            Self::PrerequisiteMissing | Self::DiskSpaceInsufficient => {
                StatusCode::PRECONDITION_FAILED
            }

            // Timeout (504)
            Self::SubprocessTimedOut => StatusCode::GATEWAY_TIMEOUT,

            // Bad Gateway (502) - an external tool misbehaved
            Self::AuthenticationFailure
            | Self::SubprocessNonZeroExit
            | Self::SubprocessSpawnFailed => StatusCode::BAD_GATEWAY,

            // Internal Server Error (500)
            Self::ManifestMissing
            | Self::Io
            | Self::SerializationError
            | Self::ConfigurationError
            | Self::NotificationFailed
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if a pipeline stage failing with this error may be retried.
    ///
    /// Preflight failures are never retried: a missing tool or a full disk
    /// is not transient. Subprocess failures and auth-service hiccups are.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure
                | Self::SubprocessNonZeroExit
                | Self::SubprocessTimedOut
                | Self::SubprocessSpawnFailed
                | Self::NotificationFailed
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "job",
            1100..=1199 => "preflight",
            1200..=1299 => "pipeline",
            2000..=2099 => "infrastructure",
            _ => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (selects the log level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// User errors (bad input, illegal transitions)
    Low,
    /// Operational issues (tool failures, timeouts)
    Medium,
    /// System errors (I/O failures, corrupted state)
    High,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::InvalidSpec
            | ErrorCode::DuplicateName
            | ErrorCode::JobNotFound
            | ErrorCode::InvalidStateTransition => Self::Low,

            ErrorCode::PrerequisiteMissing
            | ErrorCode::DiskSpaceInsufficient
            | ErrorCode::AuthenticationFailure
            | ErrorCode::SubprocessNonZeroExit
            | ErrorCode::SubprocessTimedOut
            | ErrorCode::SubprocessSpawnFailed
            | ErrorCode::ManifestMissing
            | ErrorCode::NotificationFailed => Self::Medium,

            ErrorCode::Io
            | ErrorCode::SerializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::InternalError => Self::High,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MirrorError
// ═══════════════════════════════════════════════════════════════════════════════

/// The primary error type for PakMirror core.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct MirrorError {
    /// Stable error code
    code: ErrorCode,
    /// User-facing message
    message: String,
    /// Detailed internal message, never sent to clients
    #[serde(skip_serializing_if = "Option::is_none")]
    internal: Option<String>,
}

impl MirrorError {
    /// Create a new error with a code and user-facing message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            internal: None,
        }
    }

    /// Create a new error carrying an internal detail message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<String>,
        internal: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            internal: Some(internal.into()),
        }
    }

    /// Bad job specification, rejected at creation.
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidSpec, message)
    }

    /// A non-dismissed job already uses this name.
    pub fn duplicate_name(name: &str) -> Self {
        Self::new(
            ErrorCode::DuplicateName,
            format!("a job named '{}' already exists", name),
        )
    }

    /// No job with this id.
    pub fn job_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::JobNotFound, format!("job {} not found", id))
    }

    /// The requested operation is illegal in the job's current status.
    pub fn invalid_transition(action: &str, status: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("cannot {} a job in status '{}'", action, status),
        )
    }

    /// Get the error code.
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.message
    }

    /// Get the internal detail, if any.
    pub fn internal_detail(&self) -> Option<&str> {
        self.internal.as_deref()
    }

    /// Get the severity.
    pub const fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// Check if the underlying condition is transient.
    pub const fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Log this error at a level matching its severity.
    pub fn log(&self) {
        match self.severity() {
            ErrorSeverity::Low => info!(
                code = %self.code,
                category = self.code.category(),
                "{}",
                self.message
            ),
            ErrorSeverity::Medium => warn!(
                code = %self.code,
                category = self.code.category(),
                internal = self.internal.as_deref().unwrap_or(""),
                "{}",
                self.message
            ),
            ErrorSeverity::High => error!(
                code = %self.code,
                category = self.code.category(),
                internal = self.internal.as_deref().unwrap_or(""),
                "{}",
                self.message
            ),
        }
    }
}

impl From<std::io::Error> for MirrorError {
    fn from(err: std::io::Error) -> Self {
        Self::with_internal(ErrorCode::Io, "I/O operation failed", err.to_string())
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_internal(
            ErrorCode::SerializationError,
            "serialization failed",
            err.to_string(),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

/// Wire shape of an error response body.
#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    error_code: ErrorCode,
}

impl IntoResponse for MirrorError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.code.http_status();
        let body = ErrorBody {
            success: false,
            error: self.message,
            error_code: self.code,
        };
        (status, Json(body)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Context Extension
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for attaching a user-facing message and code to foreign errors.
pub trait ErrorContext<T> {
    /// Wrap the error with a code and message, keeping the original as internal detail.
    fn error_context(self, code: ErrorCode, message: &str) -> Result<T>;
}

impl<T, E: fmt::Display> ErrorContext<T> for std::result::Result<T, E> {
    fn error_context(self, code: ErrorCode, message: &str) -> Result<T> {
        self.map_err(|e| MirrorError::with_internal(code, message, e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::InvalidSpec.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::JobNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::DuplicateName.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::InvalidStateTransition.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::SubprocessTimedOut.http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorCode::AuthenticationFailure.is_retryable());
        assert!(ErrorCode::SubprocessNonZeroExit.is_retryable());
        assert!(ErrorCode::SubprocessTimedOut.is_retryable());
        assert!(!ErrorCode::DiskSpaceInsufficient.is_retryable());
        assert!(!ErrorCode::PrerequisiteMissing.is_retryable());
        assert!(!ErrorCode::InvalidSpec.is_retryable());
    }

    #[test]
    fn test_display_and_internal_detail() {
        let err = MirrorError::with_internal(
            ErrorCode::Io,
            "I/O operation failed",
            "permission denied",
        );
        let rendered = err.to_string();
        assert!(rendered.contains("Io"));
        assert!(rendered.contains("I/O operation failed"));
        assert_eq!(err.internal_detail(), Some("permission denied"));
    }

    #[test]
    fn test_helper_constructors() {
        let err = MirrorError::duplicate_name("pn-7.3.2");
        assert_eq!(err.code(), ErrorCode::DuplicateName);
        assert!(err.user_message().contains("pn-7.3.2"));

        let err = MirrorError::invalid_transition("dismiss", "mirroring");
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        assert!(err.user_message().contains("mirroring"));
    }

    #[test]
    fn test_severity_from_code() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::JobNotFound),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::SubprocessNonZeroExit),
            ErrorSeverity::Medium
        );
        assert_eq!(ErrorSeverity::from_code(&ErrorCode::Io), ErrorSeverity::High);
    }
}
