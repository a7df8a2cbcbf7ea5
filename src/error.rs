//! # Error Handling
//!
//! Two layers of errors:
//! - [`BatchError`]: usage errors returned synchronously by the batch
//!   orchestrator (a second run, a stale cancel, a confirmation nobody asked for)
//! - [`AppError`]: what HTTP handlers return; converted to a JSON response
//!
//! Failures that happen *inside* a run (engine errors, unreadable files,
//! persistence errors) are never returned through these types. They travel as
//! `error` events on the batch event stream so the run can keep going.
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "conflict",
//!     "message": "A batch process is already in progress.",
//!     "timestamp": "2024-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;

/// Errors returned by the orchestrator's control operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// `process_batch` while another run is active
    AlreadyRunning,

    /// A control operation that needs an active run
    NotRunning,

    /// `cancel_item` for an index that is not being processed
    NotCurrentItem { requested: usize, current: Option<usize> },

    /// `confirm_and_continue` while no item is waiting for confirmation
    NoPendingConfirmation,

    /// `confirm_and_continue` naming a different file than the pending item
    PathMismatch { index: usize, expected: PathBuf, actual: PathBuf },

    /// The batch request itself is unusable
    InvalidConfig(String),
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchError::AlreadyRunning => write!(f, "A batch process is already in progress."),
            BatchError::NotRunning => write!(f, "No batch process is running."),
            BatchError::NotCurrentItem { requested, current: Some(current) } => write!(
                f,
                "Item {} is not being processed (current item is {})",
                requested, current
            ),
            BatchError::NotCurrentItem { requested, current: None } => {
                write!(f, "Item {} is not being processed", requested)
            }
            BatchError::NoPendingConfirmation => write!(f, "No transcription is awaiting confirmation."),
            BatchError::PathMismatch { index, expected, actual } => write!(
                f,
                "Item {} is {}, not {}",
                index,
                expected.display(),
                actual.display()
            ),
            BatchError::InvalidConfig(msg) => write!(f, "Invalid batch configuration: {}", msg),
        }
    }
}

impl std::error::Error for BatchError {}

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500)
/// - **BadRequest**: Client sent invalid data (400)
/// - **NotFound**: Requested resource doesn't exist (404)
/// - **Conflict**: Request clashes with the current batch state (409)
/// - **ConfigError**: Configuration problems (500)
/// - **ValidationError**: Data validation failed (400)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    ConfigError(String),
    ValidationError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    fn parts(&self) -> (actix_web::http::StatusCode, &'static str, &str) {
        use actix_web::http::StatusCode;
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Orchestrator usage errors map onto the HTTP status a client can act on.
impl From<BatchError> for AppError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::InvalidConfig(msg) => AppError::ValidationError(msg),
            mismatch @ BatchError::PathMismatch { .. } => AppError::BadRequest(mismatch.to_string()),
            other => AppError::Conflict(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always the client's fault, hence 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
