//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use webflo_core::CoreError;
use webflo_http::HttpError;
use webflo_messaging::MessagingError;

/// Errors raised while serving requests or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or accepting failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Session or thread state could not be opened or committed.
    #[error(transparent)]
    Http(#[from] HttpError),
    /// The request named an invalid ID.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// A port or transport failed.
    #[error(transparent)]
    Messaging(#[from] MessagingError),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Core(CoreError::InvalidValue(_)) => StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!(error = %self, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
