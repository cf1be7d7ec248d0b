//! Error types shared across crates.

use thiserror::Error;

/// Errors raised by a [`KvStore`](crate::platform::KvStore) backend.
///
/// The core never retries; these propagate unchanged to the caller.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not complete the operation (I/O, network, ...).
    #[error("store backend error: {0}")]
    Backend(String),
    /// A stored value did not have the expected shape.
    #[error("malformed record under key '{key}': {reason}")]
    Malformed {
        /// Store key holding the bad record.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
    /// JSON encoding/decoding failed.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by core utilities.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A value supplied by a caller was invalid.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
