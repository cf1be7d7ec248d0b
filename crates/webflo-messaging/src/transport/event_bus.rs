//! In-process event bus: every endpoint hears every other endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::trace;
use webflo_core::{IdGenerator, UuidGenerator};

use super::{Inbox, MessageTransport};
use crate::envelope::Envelope;
use crate::errors::MessagingError;

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<(String, Inbox)>>,
}

/// Shared in-process bus.
///
/// Delivery is unbounded and never lags; an envelope reaches every listening
/// endpoint except its sender.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint on this bus.
    pub fn endpoint(&self) -> EventBusEndpoint {
        EventBusEndpoint {
            id: UuidGenerator.generate(),
            bus: self.inner.clone(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of endpoints currently listening.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

/// One endpoint on an [`EventBus`].
pub struct EventBusEndpoint {
    id: String,
    bus: Arc<BusInner>,
    closed: AtomicBool,
}

impl MessageTransport for EventBusEndpoint {
    fn endpoint_id(&self) -> &str {
        &self.id
    }

    fn send(&self, mut envelope: Envelope) -> crate::Result<()> {
        if self.is_closed() {
            return Err(MessagingError::Closed);
        }
        envelope.origin = Some(self.id.clone());
        let mut listeners = self.bus.listeners.lock();
        listeners.retain(|(id, inbox)| {
            if *id == self.id {
                return true;
            }
            inbox.send(envelope.clone()).is_ok()
        });
        trace!(endpoint = %self.id, listeners = listeners.len(), "bus envelope sent");
        Ok(())
    }

    fn on_message(&self, inbox: Inbox) {
        if self.is_closed() {
            return;
        }
        self.bus.listeners.lock().push((self.id.clone(), inbox));
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.listeners.lock().retain(|(id, _)| *id != self.id);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_shared(&self) -> bool {
        true
    }
}

impl Drop for EventBusEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn delivers_to_others_not_self() {
        let bus = EventBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        a.on_message(a_tx);
        b.on_message(b_tx);

        a.send(Envelope::message("hello", json!(1))).unwrap();

        let got = b_rx.recv().await.unwrap();
        assert_eq!(got.message_type, "hello");
        assert_eq!(got.origin.as_deref(), Some(a.endpoint_id()));
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_endpoint_stops_listening_and_sending() {
        let bus = EventBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        b.on_message(b_tx);
        assert_eq!(bus.listener_count(), 1);

        b.close();
        assert_eq!(bus.listener_count(), 0);
        assert!(b_rx.recv().await.is_none());

        a.close();
        assert!(a.send(Envelope::message("x", json!(null))).is_err());
    }

    #[test]
    fn drop_unregisters() {
        let bus = EventBus::new();
        {
            let a = bus.endpoint();
            let (tx, _rx) = mpsc::unbounded_channel();
            a.on_message(tx);
            assert_eq!(bus.listener_count(), 1);
        }
        assert_eq!(bus.listener_count(), 0);
    }
}
