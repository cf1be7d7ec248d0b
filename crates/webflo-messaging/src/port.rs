//! Request/response messaging over one transport.
//!
//! A [`MessagePort`] owns one [`MessageTransport`] endpoint and layers the
//! request/response protocol on top of it:
//!
//! - every request carries a fresh [`CorrelationId`]; a response is handed to
//!   the pending entry registered under that ID and nowhere else
//! - with `handshake` set, posts are queued until a handshake round-trip with
//!   the peer completes
//! - with `auto_close` set, the port closes itself once its pending set
//!   drains to zero, unless it has been kept alive
//!
//! Observers (the registry's idle watcher, the hub) follow a port through
//! its [`PortStatus`] watch channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};
use webflo_core::{CorrelationId, PortId};

use crate::envelope::{Envelope, EnvelopeKind};
use crate::errors::{MessagingError, Result};
use crate::event::{
    Disposition, DispatchOutcome, Listener, ListenerId, ListenerSet, MessageEvent, ReplyPort,
    dispatch,
};
use crate::transport::MessageTransport;

/// Per-port protocol options.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortOptions {
    /// Hold posts until a handshake round-trip completes.
    pub handshake: bool,
    /// Close once the pending set drains to zero.
    pub auto_close: bool,
    /// Resource the port was opened for, if any.
    pub url: Option<String>,
}

/// Observable port state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortStatus {
    /// Requests awaiting a response.
    pub pending: usize,
    /// Bumped on every send, delivery and [`MessagePort::touch`].
    pub activity: u64,
    /// Posts flow straight to the transport.
    pub open: bool,
    /// The port has been closed.
    pub closed: bool,
}

enum PendingReply {
    Callback(Box<dyn FnOnce(MessageEvent) + Send>),
    Query(oneshot::Sender<MessageEvent>),
}

#[derive(Default)]
struct PortState {
    open: bool,
    closed: bool,
    keep_alive: bool,
    outbox: Vec<Envelope>,
    pending: HashMap<CorrelationId, PendingReply>,
    listeners: ListenerSet,
    default_handler: Option<Listener>,
}

/// An addressable message endpoint bound to one transport.
pub struct MessagePort {
    id: PortId,
    transport: Arc<dyn MessageTransport>,
    options: PortOptions,
    state: Mutex<PortState>,
    status: watch::Sender<PortStatus>,
}

impl MessagePort {
    /// Bind a port to `transport` and start receiving.
    ///
    /// Without `handshake` the port is open immediately; otherwise it sends
    /// a handshake and opens when the peer answers (or greets first).
    pub fn connect(
        id: PortId,
        transport: Arc<dyn MessageTransport>,
        options: PortOptions,
    ) -> Arc<Self> {
        let open = !options.handshake;
        let port = Arc::new(Self {
            id,
            transport,
            options,
            state: Mutex::new(PortState {
                open,
                ..PortState::default()
            }),
            status: watch::Sender::new(PortStatus {
                open,
                ..PortStatus::default()
            }),
        });

        let (inbox, rx) = mpsc::unbounded_channel();
        port.transport.on_message(inbox);
        if port.options.handshake {
            if let Err(e) = port.transport.send(Envelope::handshake()) {
                warn!(port_id = %port.id, error = %e, "failed to send handshake");
            }
        }
        spawn_receiver(Arc::downgrade(&port), rx);

        debug!(port_id = %port.id, handshake = port.options.handshake, "port connected");
        port
    }

    /// Port identifier.
    pub fn id(&self) -> &PortId {
        &self.id
    }

    /// Resource URL the port was opened for.
    pub fn url(&self) -> Option<&str> {
        self.options.url.as_deref()
    }

    /// Options the port was created with.
    pub fn options(&self) -> &PortOptions {
        &self.options
    }

    /// Whether posts flow straight to the transport.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Whether the port has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Watch the port's status.
    pub fn subscribe_status(&self) -> watch::Receiver<PortStatus> {
        self.status.subscribe()
    }

    /// Send a fire-and-forget message.
    pub fn post_message(&self, message_type: &str, data: Value) -> Result<()> {
        self.send(Envelope::message(message_type, data))
    }

    /// Send a request; `on_response` runs once with the matching response.
    ///
    /// The callback is dropped unrun if the port closes first.
    pub fn post_request<F>(&self, message_type: &str, data: Value, on_response: F) -> Result<CorrelationId>
    where
        F: FnOnce(MessageEvent) + Send + 'static,
    {
        let correlation_id = self.register(PendingReply::Callback(Box::new(on_response)))?;
        let request = Envelope::request(message_type, data, correlation_id.clone());
        if let Err(e) = self.send(request) {
            self.forget(&correlation_id);
            return Err(e);
        }
        Ok(correlation_id)
    }

    /// Send a request and wait for its response.
    ///
    /// Fails with [`MessagingError::Closed`] if the port closes before the
    /// response arrives. Dropping the future withdraws the request.
    pub async fn query(&self, message_type: &str, data: Value) -> Result<MessageEvent> {
        let (tx, rx) = oneshot::channel();
        let correlation_id = self.register(PendingReply::Query(tx))?;
        let _withdraw = Withdraw {
            port: self,
            correlation_id: correlation_id.clone(),
        };
        self.send(Envelope::request(message_type, data, correlation_id))?;
        rx.await.map_err(|_| MessagingError::Closed)
    }

    /// Listen for inbound messages of `message_type`.
    pub fn add_listener<F>(&self, message_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) -> Disposition + Send + Sync + 'static,
    {
        self.state
            .lock()
            .listeners
            .add(Some(message_type), Arc::new(listener))
    }

    /// Listen for every inbound message, after the typed listeners.
    pub fn add_wildcard_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) -> Disposition + Send + Sync + 'static,
    {
        self.state.lock().listeners.add(None, Arc::new(listener))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.remove(id)
    }

    /// Handler run after the listeners unless one of them prevented it.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&MessageEvent) -> Disposition + Send + Sync + 'static,
    {
        self.state.lock().default_handler = Some(Arc::new(handler));
    }

    /// Suspend or resume auto-close.
    pub fn keep_alive(&self, keep: bool) {
        let drained = {
            let mut state = self.state.lock();
            state.keep_alive = keep;
            state.pending.is_empty()
        };
        if !keep && drained && self.options.auto_close {
            self.close();
        }
    }

    /// Record activity, restarting any idle timer watching this port.
    pub fn touch(&self) {
        self.status.send_modify(|s| s.activity = s.activity.wrapping_add(1));
    }

    /// Close the port. Idempotent.
    ///
    /// Pending requests are dropped: queries resolve to
    /// [`MessagingError::Closed`], callbacks never run.
    pub fn close(&self) {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.open = false;
            state.outbox.clear();
            std::mem::take(&mut state.pending)
        };
        let abandoned = dropped.len();
        drop(dropped);

        if !self.transport.is_shared() && !self.transport.is_closed() {
            let _ = self.transport.send(Envelope::close());
        }
        self.transport.close();
        self.status.send_modify(|s| {
            s.closed = true;
            s.open = false;
            s.pending = 0;
        });
        debug!(port_id = %self.id, abandoned, "port closed");
    }

    /// Wait until the port closes.
    pub async fn closed(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| s.closed).await;
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MessagingError::Closed);
            }
            if !state.open {
                trace!(port_id = %self.id, message_type = %envelope.message_type, "queued until handshake");
                state.outbox.push(envelope);
                return Ok(());
            }
        }
        self.transport.send(envelope)?;
        self.touch();
        Ok(())
    }

    fn register(&self, reply: PendingReply) -> Result<CorrelationId> {
        let correlation_id = CorrelationId::new();
        let pending = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(MessagingError::Closed);
            }
            let _ = state.pending.insert(correlation_id.clone(), reply);
            state.pending.len()
        };
        self.status.send_modify(|s| s.pending = pending);
        Ok(correlation_id)
    }

    fn forget(&self, correlation_id: &CorrelationId) {
        let pending = {
            let mut state = self.state.lock();
            if state.pending.remove(correlation_id).is_none() {
                return;
            }
            state.pending.len()
        };
        self.status.send_modify(|s| s.pending = pending);
    }

    fn receive(&self, envelope: Envelope) {
        match envelope.kind {
            EnvelopeKind::Handshake => {
                if let Err(e) = self.transport.send(Envelope::handshake_ack()) {
                    warn!(port_id = %self.id, error = %e, "failed to acknowledge handshake");
                }
                self.mark_open();
            }
            EnvelopeKind::HandshakeAck => self.mark_open(),
            EnvelopeKind::Close => {
                if !self.transport.is_shared() {
                    debug!(port_id = %self.id, "peer closed");
                    self.close();
                }
            }
            EnvelopeKind::Response => self.resolve(envelope),
            EnvelopeKind::Message | EnvelopeKind::Request => {
                let _ = self.deliver(envelope);
            }
        }
    }

    fn mark_open(&self) {
        let queued = {
            let mut state = self.state.lock();
            if state.open || state.closed {
                return;
            }
            state.open = true;
            std::mem::take(&mut state.outbox)
        };
        debug!(port_id = %self.id, flushed = queued.len(), "handshake complete");
        for envelope in queued {
            if let Err(e) = self.transport.send(envelope) {
                warn!(port_id = %self.id, error = %e, "failed to flush queued envelope");
            }
        }
        self.status.send_modify(|s| {
            s.open = true;
            s.activity = s.activity.wrapping_add(1);
        });
    }

    fn resolve(&self, mut envelope: Envelope) {
        let Some(correlation_id) = envelope.correlation_id.take() else {
            trace!(port_id = %self.id, "response without correlation id");
            return;
        };
        let (reply, remaining, auto_close) = {
            let mut state = self.state.lock();
            let reply = state.pending.remove(&correlation_id);
            let auto_close = self.options.auto_close && !state.keep_alive;
            (reply, state.pending.len(), auto_close)
        };
        let Some(reply) = reply else {
            trace!(port_id = %self.id, %correlation_id, "no pending request for response");
            return;
        };

        self.status.send_modify(|s| {
            s.pending = remaining;
            s.activity = s.activity.wrapping_add(1);
        });
        let event = MessageEvent::from_envelope(envelope, Vec::new());
        match reply {
            PendingReply::Callback(callback) => callback(event),
            PendingReply::Query(tx) => {
                let _ = tx.send(event);
            }
        }

        if remaining == 0 && auto_close {
            self.close();
        }
    }

    fn deliver(&self, envelope: Envelope) -> DispatchOutcome {
        let ports = match (&envelope.kind, &envelope.correlation_id) {
            (EnvelopeKind::Request, Some(cid)) => {
                vec![ReplyPort::new(self.transport.clone(), cid.clone())]
            }
            _ => Vec::new(),
        };
        let ((typed, wildcard), default_handler) = {
            let state = self.state.lock();
            (
                state.listeners.snapshot(&envelope.message_type),
                state.default_handler.clone(),
            )
        };
        self.touch();

        let event = MessageEvent::from_envelope(envelope, ports);
        let outcome = dispatch(&typed, &wildcard, &event);
        if !outcome.default_prevented {
            if let Some(handler) = default_handler {
                let _ = handler(&event);
            }
        }
        outcome
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl Drop for MessagePort {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// Removes a query's pending entry when the query future goes away.
struct Withdraw<'a> {
    port: &'a MessagePort,
    correlation_id: CorrelationId,
}

impl Drop for Withdraw<'_> {
    fn drop(&mut self) {
        self.port.forget(&self.correlation_id);
    }
}

fn spawn_receiver(port: Weak<MessagePort>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    drop(tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let Some(port) = port.upgrade() else {
                return;
            };
            port.receive(envelope);
        }
        if let Some(port) = port.upgrade() {
            debug!(port_id = %port.id, "transport ended");
            port.close();
        }
    }));
}
