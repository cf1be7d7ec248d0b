//! Messaging error types.

use thiserror::Error;

/// Errors raised by ports, hubs and transports.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The port or transport is closed.
    #[error("port closed")]
    Closed,
    /// The underlying transport rejected the envelope.
    #[error("transport error: {0}")]
    Transport(String),
    /// A hub query was issued with no member ports.
    #[error("no response: hub has no member ports")]
    NoResponse,
    /// Envelope encoding/decoding failed.
    #[error("envelope serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(MessagingError::Closed.to_string(), "port closed");
        assert_eq!(MessagingError::NoResponse.to_string(), "no response: hub has no member ports");
        assert_eq!(
            MessagingError::Transport("socket gone".into()).to_string(),
            "transport error: socket gone"
        );
    }
}
