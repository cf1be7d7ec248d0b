//! The transport seam.
//!
//! A [`MessageTransport`] moves [`Envelope`]s between endpoints. Ports are
//! written against this trait only; which concrete transport sits underneath
//! (in-process bus, pipe, broadcast ring, WebSocket) is injected.

mod event_bus;
mod pipe;

pub use event_bus::{EventBus, EventBusEndpoint};
pub use pipe::{MessagePipe, PipeEnd};

use tokio::sync::mpsc;

use crate::envelope::Envelope;

/// Where a transport delivers inbound envelopes.
pub type Inbox = mpsc::UnboundedSender<Envelope>;

/// One endpoint of a message transport.
pub trait MessageTransport: Send + Sync {
    /// Identity of this endpoint, stamped as `origin` on outgoing envelopes.
    fn endpoint_id(&self) -> &str;

    /// Send an envelope to the peer(s).
    fn send(&self, envelope: Envelope) -> crate::Result<()>;

    /// Route inbound envelopes into `inbox`.
    ///
    /// Dropping the inbox's last sender signals that the transport closed.
    fn on_message(&self, inbox: Inbox);

    /// Close this endpoint.
    fn close(&self);

    /// Whether this endpoint has been closed.
    fn is_closed(&self) -> bool;

    /// Whether many peers share the medium.
    ///
    /// Close notices are neither sent nor honored on shared transports: one
    /// member leaving a broadcast medium does not close the others.
    fn is_shared(&self) -> bool {
        false
    }
}
