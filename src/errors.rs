use crate::{config::ConfigError, services::journal_service::JournalError, stores::StoreError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;

/// Failures that escape the per-request boundary and fail a whole invocation.
///
/// Ordinary store failures never show up here; they become a failed
/// `TransferResult` for the one request they hit.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid notification: {0}")]
    InvalidEvent(#[from] serde_json::Error),
    #[error("transfer of `{source_location}` failed unexpectedly: {error}")]
    Unexpected {
        source_location: String,
        #[source]
        error: StoreError,
    },
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<ReplicationError> for AppError {
    fn from(err: ReplicationError) -> Self {
        match err {
            ReplicationError::InvalidEvent(_) => AppError::bad_request(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<JournalError> for AppError {
    fn from(err: JournalError) -> Self {
        AppError::internal(format!("journal error: {}", err))
    }
}
