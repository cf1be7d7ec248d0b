//! Errors for request-scoped state.

use thiserror::Error;
use webflo_core::StoreError;

/// Errors raised by sessions and threads.
#[derive(Debug, Error)]
pub enum HttpError {
    /// A server-side session was opened without a session ID.
    #[error("server-side session requires a session id")]
    MissingSessionId,
    /// The session secret could not key the signer.
    #[error("invalid session secret: {0}")]
    InvalidSecret(String),
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// JSON encoding/decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, HttpError>;
