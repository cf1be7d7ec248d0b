//! Two linked endpoints, point-to-point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use webflo_core::{IdGenerator, UuidGenerator};

use super::{Inbox, MessageTransport};
use crate::envelope::Envelope;
use crate::errors::MessagingError;

#[derive(Default)]
struct Slot {
    inbox: Option<Inbox>,
    backlog: Vec<Envelope>,
}

#[derive(Default)]
struct Shared {
    slots: [Mutex<Slot>; 2],
    closed: AtomicBool,
}

/// Constructor for linked [`PipeEnd`] pairs.
#[derive(Debug)]
pub struct MessagePipe;

impl MessagePipe {
    /// Create two linked ends.
    ///
    /// Envelopes sent before the peer listens are buffered. Closing or
    /// dropping either end closes both.
    pub fn pair() -> (PipeEnd, PipeEnd) {
        let shared = Arc::new(Shared::default());
        let left = PipeEnd {
            id: UuidGenerator.generate(),
            side: 0,
            shared: shared.clone(),
        };
        let right = PipeEnd {
            id: UuidGenerator.generate(),
            side: 1,
            shared,
        };
        (left, right)
    }
}

/// One end of a [`MessagePipe`].
pub struct PipeEnd {
    id: String,
    side: usize,
    shared: Arc<Shared>,
}

impl MessageTransport for PipeEnd {
    fn endpoint_id(&self) -> &str {
        &self.id
    }

    fn send(&self, mut envelope: Envelope) -> crate::Result<()> {
        if self.is_closed() {
            return Err(MessagingError::Closed);
        }
        envelope.origin = Some(self.id.clone());
        let mut peer = self.shared.slots[1 - self.side].lock();
        match &peer.inbox {
            Some(inbox) => inbox.send(envelope).map_err(|_| MessagingError::Closed),
            None => {
                peer.backlog.push(envelope);
                Ok(())
            }
        }
    }

    fn on_message(&self, inbox: Inbox) {
        if self.is_closed() {
            return;
        }
        let mut slot = self.shared.slots[self.side].lock();
        for envelope in slot.backlog.drain(..) {
            let _ = inbox.send(envelope);
        }
        slot.inbox = Some(inbox);
    }

    fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in &self.shared.slots {
            let mut slot = slot.lock();
            slot.inbox = None;
            slot.backlog.clear();
        }
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for PipeEnd {
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
    async fn delivers_point_to_point() {
        let (a, b) = MessagePipe::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_message(tx);

        a.send(Envelope::message("ping", json!(1))).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.message_type, "ping");
        assert_eq!(got.origin.as_deref(), Some(a.endpoint_id()));
    }

    #[tokio::test]
    async fn buffers_until_peer_listens() {
        let (a, b) = MessagePipe::pair();
        a.send(Envelope::message("first", json!(null))).unwrap();
        a.send(Envelope::message("second", json!(null))).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_message(tx);
        assert_eq!(rx.recv().await.unwrap().message_type, "first");
        assert_eq!(rx.recv().await.unwrap().message_type, "second");
    }

    #[tokio::test]
    async fn closing_one_end_closes_both() {
        let (a, b) = MessagePipe::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        b.on_message(tx);

        a.close();
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(rx.recv().await.is_none());
        assert!(b.send(Envelope::message("late", json!(null))).is_err());
    }

    #[tokio::test]
    async fn dropping_an_end_closes_the_pipe() {
        let (a, b) = MessagePipe::pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        a.on_message(tx);
        drop(b);
        assert!(a.is_closed());
        assert!(rx.recv().await.is_none());
    }
}
