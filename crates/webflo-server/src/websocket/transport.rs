//! [`MessageTransport`] over one `WebSocket` connection.
//!
//! Outbound envelopes go into a bounded queue drained by the connection's
//! writer task; inbound frames are decoded by the reader and handed to
//! [`WsTransport::deliver`].

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use webflo_messaging::transport::Inbox;
use webflo_messaging::{Envelope, MessageTransport, MessagingError};

#[derive(Default)]
struct InboundSlot {
    inbox: Option<Inbox>,
    backlog: Vec<Envelope>,
}

/// One connection's endpoint.
pub struct WsTransport {
    id: String,
    outbound: mpsc::Sender<Envelope>,
    inbound: Mutex<InboundSlot>,
    closed: CancellationToken,
}

impl WsTransport {
    /// Create an endpoint writing into `outbound`.
    pub fn new(id: impl Into<String>, outbound: mpsc::Sender<Envelope>) -> Self {
        Self {
            id: id.into(),
            outbound,
            inbound: Mutex::new(InboundSlot::default()),
            closed: CancellationToken::new(),
        }
    }

    /// Hand a decoded inbound envelope to the bound port.
    ///
    /// Envelopes arriving before a port binds are buffered.
    pub fn deliver(&self, envelope: Envelope) {
        if self.is_closed() {
            trace!(endpoint = %self.id, "dropping envelope on closed transport");
            return;
        }
        let mut slot = self.inbound.lock();
        match &slot.inbox {
            Some(inbox) => {
                let _ = inbox.send(envelope);
            }
            None => slot.backlog.push(envelope),
        }
    }

    /// Token cancelled when the transport closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl MessageTransport for WsTransport {
    fn endpoint_id(&self) -> &str {
        &self.id
    }

    fn send(&self, envelope: Envelope) -> webflo_messaging::Result<()> {
        if self.is_closed() {
            return Err(MessagingError::Closed);
        }
        self.outbound.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(envelope) => {
                warn!(
                    endpoint = %self.id,
                    message_type = %envelope.message_type,
                    "send queue full, dropping envelope"
                );
                MessagingError::Transport("send queue full".into())
            }
            TrySendError::Closed(_) => MessagingError::Closed,
        })
    }

    fn on_message(&self, inbox: Inbox) {
        if self.is_closed() {
            return;
        }
        let mut slot = self.inbound.lock();
        for envelope in slot.backlog.drain(..) {
            let _ = inbox.send(envelope);
        }
        slot.inbox = Some(inbox);
    }

    fn close(&self) {
        self.closed.cancel();
        let mut slot = self.inbound.lock();
        slot.inbox = None;
        slot.backlog.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
