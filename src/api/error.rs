//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{ArtifactError, DispatchError, JobError};

/// Error type for API handlers, rendered as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Malformed request: unparsable id, body, or query.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Job(JobError::Validation(_))
            | AppError::Artifact(ArtifactError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Job(JobError::NotFound { .. })
            | AppError::Artifact(ArtifactError::NotFound { .. }) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Job(JobError::InvalidState { .. }) => (StatusCode::CONFLICT, "INVALID_STATE"),
            AppError::Dispatch(DispatchError::UnregisteredType { .. }) => {
                (StatusCode::NOT_FOUND, "UNREGISTERED_TYPE")
            }
            AppError::Dispatch(DispatchError::InvalidTarget { .. }) => {
                (StatusCode::BAD_REQUEST, "INVALID_TARGET")
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        tracing::debug!(status = status.as_u16(), code, error = %self, "Request failed");
        let body = json!({
            "error": self.to_string(),
            "code": code,
        });
        (status, Json(body)).into_response()
    }
}
