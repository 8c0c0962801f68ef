pub mod analytics;
pub mod benchmark;
pub mod users;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::ids::UnknownScheme;
use crate::metrics::StoreError;
use crate::middleware::HandlerError;
use crate::repository::RepoError;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("query failed: {0}")]
    Store(StoreError),

    #[error("{0}")]
    Repository(RepoError),

    #[error("{0}")]
    Internal(String),

    #[error("benchmark already running")]
    AlreadyRunning,
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::InvalidId { .. } | RepoError::Validation(_) => {
                AppError::BadRequest(err.to_string())
            }
            other => AppError::Repository(other),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WindowOutOfRange(_) => AppError::BadRequest(err.to_string()),
            other => AppError::Store(other),
        }
    }
}

impl From<UnknownScheme> for AppError {
    fn from(err: UnknownScheme) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyRunning => StatusCode::CONFLICT,
            Self::Store(_) | Self::Repository(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            error!(error = %message, "request failed");
        }

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(HandlerError(message));
        response
    }
}
