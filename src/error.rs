//! # Error Handling
//!
//! Defines the application error type and how each kind maps onto an HTTP
//! response. Failures inside a job executor never reach this layer directly:
//! they are caught at the job boundary and recorded on the job record. The
//! kinds here cover both the job pipeline (load, transcription, artifact I/O)
//! and the plain API-surface failures (bad input, unknown resource).
//!
//! ## Error Categories:
//! - **NotFound**: Unknown job, batch, or artifact (404)
//! - **ValidationError**: Missing input file or bad model identifier (400)
//! - **LoadFailure**: Model fetch or load failed (500)
//! - **LoadMismatch**: Post-load identity check failed (500)
//! - **TranscriptionFailure**: The engine reported an error (500)
//! - **IoFailure**: Artifact persistence failed (500)
//! - **Internal / ConfigError**: Server-side problems (500)

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Application-wide error type.
///
/// Every variant carries a human-readable message that ends up both in the
/// log and in the structured JSON payload returned to the client.
#[derive(Debug)]
pub enum AppError {
    /// Requested job, batch, or file does not exist
    NotFound(String),

    /// Client sent invalid data (unknown model tier, missing file name, ...)
    ValidationError(String),

    /// Model weights could not be fetched or loaded
    LoadFailure(String),

    /// The loaded model does not match the requested one
    LoadMismatch(String),

    /// The transcription engine reported an error
    TranscriptionFailure(String),

    /// Writing an output artifact failed
    IoFailure(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Anything else that went wrong server-side
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::LoadFailure(msg) => write!(f, "Model load failure: {}", msg),
            AppError::LoadMismatch(msg) => write!(f, "Model load mismatch: {}", msg),
            AppError::TranscriptionFailure(msg) => write!(f, "Transcription failure: {}", msg),
            AppError::IoFailure(msg) => write!(f, "Output write failure: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

/// Converts an [`AppError`] into a structured JSON HTTP response:
///
/// ```json
/// {
///   "error": {
///     "type": "load_failure",
///     "message": "failed to load medium: ...",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::ValidationError(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            AppError::LoadFailure(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "load_failure", msg.clone())
            }
            AppError::LoadMismatch(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "load_mismatch", msg.clone())
            }
            AppError::TranscriptionFailure(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "transcription_failure",
                msg.clone(),
            ),
            AppError::IoFailure(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "io_failure", msg.clone())
            }
            AppError::ConfigError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoFailure(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
