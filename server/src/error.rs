//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A read, or any failure that makes the store itself unusable
    #[error("Engine error: {0}")]
    Engine(#[from] flora_engine::Error),

    /// A write the store did not accept
    #[error("Write failed: {0}")]
    Write(flora_engine::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Classify an engine error raised while writing.
    ///
    /// An unavailable store stays an availability problem; anything else is
    /// reported as a failed save.
    pub fn write(err: flora_engine::Error) -> Self {
        if err.is_unavailable() {
            AppError::Engine(err)
        } else {
            AppError::Write(err)
        }
    }
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Engine(e) if e.is_unavailable() => {
                tracing::error!(error = %e, "offline storage unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "offline storage unavailable".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Engine(flora_engine::Error::InvalidRecord(msg)) => {
                tracing::warn!(%msg, "stored record does not match its shape");
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invalid record".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Engine(e) => {
                tracing::error!(error = %e, "offline storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "offline storage error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Write(flora_engine::Error::InvalidRecord(msg)) => {
                (StatusCode::BAD_REQUEST, "invalid record".to_string(), Some(msg.clone()))
            }
            AppError::Write(e) => {
                tracing::error!(error = %e, "could not save offline");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "could not save offline".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
