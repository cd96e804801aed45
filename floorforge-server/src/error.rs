use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use floorforge_core::{GenerateError, ResolveError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Request-level failures, mapped onto HTTP statuses. Resolution exhaustion
/// and generation failures both surface as 500 without touching the cached
/// pipeline.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    ModelUnavailable(#[from] ResolveError),
    #[error(transparent)]
    Generation(GenerateError),
    #[error("{0}")]
    Internal(String),
}

impl From<GenerateError> for ApiError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::EmptyPrompt => Self::BadRequest(err.to_string()),
            other => Self::Generation(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, label) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            Self::ModelUnavailable(_) | Self::Generation(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": label,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
