//! HTTP request handlers for the administrative API.
//!
//! Handlers are grouped by functionality:
//! - `records` - Delivery queue CRUD
//! - `admin` - Asynchronous clears and queue statistics
//! - `schedules` - Schedule CRUD
//! - `health` - Liveness probe
//!
//! All handlers return standardized error responses with a stable code
//! and a human-readable message, and trace through the shared
//! `tracing` setup.

use airqod_core::CoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

pub mod admin;
pub mod health;
pub mod records;
pub mod schedules;

pub use admin::{clear_batch, clear_district, stats};
pub use health::liveness_check;
pub use records::{create_record, delete_record, get_record, list_records};
pub use schedules::{
    create_schedule, delete_schedule, get_schedule, list_schedules, update_schedule,
};

/// Error response with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details including code and message.
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable error description.
    pub message: String,
}

/// Storage and validation errors mapped onto HTTP responses.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            CoreError::InvalidCron { .. } => (StatusCode::BAD_REQUEST, "invalid_cron"),
            CoreError::ConstraintViolation(_) => (StatusCode::CONFLICT, "conflict"),
            CoreError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
        };

        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }

        error_response(status, code, &self.0.to_string())
    }
}

/// Creates a standardized error response.
pub(crate) fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail { code: code.to_string(), message: message.to_string() },
    };

    (status, Json(body)).into_response()
}
