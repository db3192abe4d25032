use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use wharf_deployment::DeploymentError;
use wharf_db::StoreError;
use wharf_local_deployment::RunnerError;

/// The facade's single error type. Bodies are `text/plain` (spec.md §6);
/// `404` is not-found, `400` is client error, `500` is server error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound(e.to_string()),
            StoreError::InvalidInput(_) => ApiError::BadRequest(e.to_string()),
            StoreError::StateViolation(_) => ApiError::Conflict(e.to_string()),
            StoreError::Io(_) | StoreError::Serde(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<DeploymentError> for ApiError {
    fn from(e: DeploymentError) -> Self {
        match e {
            DeploymentError::Store(inner) => inner.into(),
            DeploymentError::StateViolation(msg) => ApiError::Conflict(msg),
        }
    }
}

impl From<RunnerError> for ApiError {
    fn from(e: RunnerError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if matches!(status, StatusCode::INTERNAL_SERVER_ERROR) {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
