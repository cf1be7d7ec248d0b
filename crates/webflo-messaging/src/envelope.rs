//! Transport-agnostic message envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use webflo_core::CorrelationId;

/// What an envelope means to the receiving port.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    /// Fire-and-forget message.
    #[default]
    Message,
    /// Message expecting a response under the same correlation ID.
    Request,
    /// Reply to an earlier request.
    Response,
    /// Opening half of the handshake round-trip.
    Handshake,
    /// Closing half of the handshake round-trip.
    HandshakeAck,
    /// The sender has closed its side.
    Close,
}

/// One message on the wire.
///
/// ```json
/// { "type": "navigate", "correlationId": "0190...", "data": {...}, "kind": "request" }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Application-level message type.
    #[serde(rename = "type")]
    pub message_type: String,
    /// Present on requests and their responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Protocol role of the envelope.
    #[serde(default)]
    pub kind: EnvelopeKind,
    /// Sending endpoint, stamped by shared transports to suppress echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl Envelope {
    fn bare(kind: EnvelopeKind, message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id: None,
            data,
            kind,
            origin: None,
        }
    }

    /// A fire-and-forget message.
    pub fn message(message_type: impl Into<String>, data: Value) -> Self {
        Self::bare(EnvelopeKind::Message, message_type, data)
    }

    /// A request carrying `correlation_id`.
    pub fn request(
        message_type: impl Into<String>,
        data: Value,
        correlation_id: CorrelationId,
    ) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::bare(EnvelopeKind::Request, message_type, data)
        }
    }

    /// A response to the request carrying `correlation_id`.
    pub fn response(correlation_id: CorrelationId, data: Value) -> Self {
        Self {
            correlation_id: Some(correlation_id),
            ..Self::bare(EnvelopeKind::Response, "response", data)
        }
    }

    /// Handshake opener.
    pub fn handshake() -> Self {
        Self::bare(EnvelopeKind::Handshake, "handshake", Value::Null)
    }

    /// Handshake acknowledgment.
    pub fn handshake_ack() -> Self {
        Self::bare(EnvelopeKind::HandshakeAck, "handshake", Value::Null)
    }

    /// Close notice.
    pub fn close() -> Self {
        Self::bare(EnvelopeKind::Close, "close", Value::Null)
    }

    /// Decode an envelope from JSON text.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode the envelope as JSON text.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
