use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::identity::IdentityError;

/// AppError
///
/// Every failure a handler can surface. The `Display` text is the message the
/// client shows in its alert, so it is written for humans. Backend and
/// database details are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("not logged in")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("database errored")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Identity(e) => e.status_code(),
            AppError::Backend(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn notice_not_found() -> Self {
        AppError::NotFound("Notice not found.".to_string())
    }

    pub fn profile_not_found() -> Self {
        AppError::NotFound("User profile not found".to_string())
    }

    pub fn admin_only() -> Self {
        AppError::Forbidden("Admin access required.".to_string())
    }
}

#[derive(Serialize)]
struct ErrorInfo {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Backend(detail) => {
                tracing::error!("backend failure: {}", detail);
                "Something went wrong. Please try again.".to_string()
            }
            AppError::Database(e) => {
                tracing::error!("database failure: {:?}", e);
                "Something went wrong. Please try again.".to_string()
            }
            AppError::Identity(e) if status.is_server_error() => {
                tracing::error!("identity provider failure: {:?}", e);
                e.to_string()
            }
            other => other.to_string(),
        };
        (status, Json(ErrorInfo { error: message })).into_response()
    }
}
