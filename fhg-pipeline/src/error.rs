//! Error types for fhg-pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::ServiceError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., report requested before the task finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Submission queue full (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// fhg-common error
    #[error("Common error: {0}")]
    Common(#[from] fhg_common::Error),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ServiceError::NotFound(task_id) => ApiError::NotFound(format!("task {}", task_id)),
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::QueueFull => {
                ApiError::Unavailable("submission queue is full, retry later".to_string())
            }
            ServiceError::Store(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_FULL", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
