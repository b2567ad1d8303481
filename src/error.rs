//! # Error Handling
//!
//! This module defines custom error types and how they're converted to HTTP responses.
//!
//! ## Error Categories:
//! - **ValidationError**: Request rejected before any processing (400 errors)
//! - **PayloadTooLarge**: Upload exceeds the configured byte limit (413 errors)
//! - **RateLimited**: Sliding-window limit hit, carries a retry-after hint (429 errors)
//! - **ServiceUnavailable**: Classifier not configured or failed to load (503 errors)
//! - **BadRequest**: Malformed request data (400 errors)
//! - **Internal/ConfigError**: Server-side problems (500 errors)
//!
//! Classification failures deliberately do NOT appear here: preprocessing or
//! inference errors are downgraded to `unknown` verdicts inside the detection
//! module and never travel across the HTTP boundary as faults.
//!
//! ## JSON Response Format:
//! All errors return JSON with a consistent structure:
//! ```json
//! {
//!   "error": {
//!     "type": "rate_limited",
//!     "message": "Rate limit exceeded. Please try again later.",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// Each variant maps to one HTTP status class so handlers can simply return
/// `Err(...)` and get a well-formed JSON error response.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors (lock poisoning, unexpected I/O, etc.)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// User input failed validation rules (content type, call SID, size)
    ValidationError(String),

    /// Upload body exceeds the configured maximum size
    PayloadTooLarge(String),

    /// Sliding-window rate limit exceeded; hint tells the client when to retry
    RateLimited { retry_after_secs: u64 },

    /// Classifier backend is not configured or its model failed to load
    ServiceUnavailable(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::RateLimited { retry_after_secs } => {
                write!(f, "Rate limit exceeded, retry after {}s", retry_after_secs)
            }
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Converts our custom errors into HTTP responses that clients can understand.
///
/// ## HTTP Status Code Mapping:
/// - Internal/ConfigError → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - PayloadTooLarge → 413 (Payload Too Large)
/// - RateLimited → 429 (Too Many Requests) with a Retry-After header
/// - ServiceUnavailable → 503 (Service Unavailable)
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg.clone()),
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::ValidationError(msg) => ("validation_error", msg.clone()),
            AppError::PayloadTooLarge(msg) => ("payload_too_large", msg.clone()),
            AppError::RateLimited { .. } => (
                "rate_limited",
                "Rate limit exceeded. Please try again later.".to_string(),
            ),
            AppError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone()),
            AppError::ConfigError(msg) => ("config_error", msg.clone()),
        };

        let mut builder = HttpResponse::build(self.status_code());

        // Clients use this header to schedule their next attempt.
        if let AppError::RateLimited { retry_after_secs } = self {
            builder.insert_header(("Retry-After", retry_after_secs.to_string()));
        }

        builder.json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error, it automatically becomes an
/// AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed
/// data, so they map to 400 rather than 500.
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

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
