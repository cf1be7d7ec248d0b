//! Inbound message events and listener dispatch.
//!
//! A [`MessageEvent`] is what listeners see for every inbound message or
//! request. Listeners return a [`Disposition`] instead of mutating flags on a
//! shared event, and [`dispatch`] threads those results through two phases:
//! listeners registered for the event's type, then wildcard listeners.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;
use webflo_core::CorrelationId;

use crate::envelope::Envelope;
use crate::transport::MessageTransport;

/// Listener result controlling the rest of the dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Disposition {
    /// Keep dispatching.
    #[default]
    Continue,
    /// Finish the current phase, skip the wildcard phase.
    StopPropagation,
    /// Stop dispatching immediately.
    StopImmediate,
    /// Keep dispatching, but do not run the default handler.
    PreventDefault,
}

/// Result of running the listeners for one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Number of listeners invoked.
    pub invoked: usize,
    /// A listener returned [`Disposition::PreventDefault`].
    pub default_prevented: bool,
    /// A listener stopped propagation (either kind).
    pub propagation_stopped: bool,
}

/// Event listener.
pub type Listener = Arc<dyn Fn(&MessageEvent) -> Disposition + Send + Sync>;

/// Handle returned when registering a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Reply channel attached to an inbound request.
#[derive(Clone)]
pub struct ReplyPort {
    transport: Arc<dyn MessageTransport>,
    correlation_id: CorrelationId,
}

impl ReplyPort {
    pub(crate) fn new(transport: Arc<dyn MessageTransport>, correlation_id: CorrelationId) -> Self {
        Self {
            transport,
            correlation_id,
        }
    }

    /// Correlation ID the reply will carry.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Send `data` back to the requester.
    pub fn post(&self, data: Value) -> crate::Result<()> {
        self.transport
            .send(Envelope::response(self.correlation_id.clone(), data))
    }
}

impl fmt::Debug for ReplyPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyPort")
            .field("correlation_id", &self.correlation_id)
            .finish_non_exhaustive()
    }
}

/// An inbound message as seen by listeners and response callbacks.
#[derive(Clone, Debug)]
pub struct MessageEvent {
    /// Application-level message type.
    pub message_type: String,
    /// Payload.
    pub data: Value,
    /// Reply channels; empty for plain messages and responses.
    pub ports: Vec<ReplyPort>,
    /// Endpoint that sent the envelope, when the transport stamps it.
    pub origin: Option<String>,
}

impl MessageEvent {
    pub(crate) fn from_envelope(envelope: Envelope, ports: Vec<ReplyPort>) -> Self {
        Self {
            message_type: envelope.message_type,
            data: envelope.data,
            ports,
            origin: envelope.origin,
        }
    }

    /// Post `data` back along every reply port.
    ///
    /// Returns `false` when the event carries no reply port, so the caller
    /// can fall back to a local default.
    pub fn respond_with(&self, data: Value) -> bool {
        for port in &self.ports {
            if let Err(e) = port.post(data.clone()) {
                warn!(correlation_id = %port.correlation_id, error = %e, "failed to post reply");
            }
        }
        !self.ports.is_empty()
    }

    /// Whether someone is waiting for a reply.
    pub fn expects_reply(&self) -> bool {
        !self.ports.is_empty()
    }
}

struct Entry {
    id: ListenerId,
    message_type: Option<String>,
    listener: Listener,
}

/// Ordered listener registrations, typed and wildcard.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next_id: u64,
    entries: Vec<Entry>,
}

impl ListenerSet {
    pub(crate) fn add(&mut self, message_type: Option<&str>, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push(Entry {
            id,
            message_type: message_type.map(str::to_owned),
            listener,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Listeners for `message_type`, split into typed and wildcard phases.
    pub(crate) fn snapshot(&self, message_type: &str) -> (Vec<Listener>, Vec<Listener>) {
        let typed = self
            .entries
            .iter()
            .filter(|e| e.message_type.as_deref() == Some(message_type))
            .map(|e| e.listener.clone())
            .collect();
        let wildcard = self
            .entries
            .iter()
            .filter(|e| e.message_type.is_none())
            .map(|e| e.listener.clone())
            .collect();
        (typed, wildcard)
    }
}

/// Run the typed phase then the wildcard phase, honoring dispositions.
pub fn dispatch(typed: &[Listener], wildcard: &[Listener], event: &MessageEvent) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();
    for phase in [typed, wildcard] {
        for listener in phase {
            outcome.invoked += 1;
            match listener(event) {
                Disposition::Continue => {}
                Disposition::PreventDefault => outcome.default_prevented = true,
                Disposition::StopPropagation => outcome.propagation_stopped = true,
                Disposition::StopImmediate => {
                    outcome.propagation_stopped = true;
                    return outcome;
                }
            }
        }
        if outcome.propagation_stopped {
            break;
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn event(message_type: &str) -> MessageEvent {
        MessageEvent::from_envelope(Envelope::message(message_type, json!(null)), Vec::new())
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, d: Disposition) -> Listener {
        let log = log.clone();
        Arc::new(move |_: &MessageEvent| {
            log.lock().push(name);
            d
        })
    }

    #[test]
    fn typed_listeners_run_before_wildcard() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let typed = vec![recorder(&log, "typed", Disposition::Continue)];
        let wildcard = vec![recorder(&log, "wild", Disposition::Continue)];
        let outcome = dispatch(&typed, &wildcard, &event("x"));
        assert_eq!(*log.lock(), vec!["typed", "wild"]);
        assert_eq!(outcome.invoked, 2);
        assert!(!outcome.default_prevented);
    }

    #[test]
    fn stop_propagation_finishes_phase_but_skips_wildcard() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let typed = vec![
            recorder(&log, "a", Disposition::StopPropagation),
            recorder(&log, "b", Disposition::Continue),
        ];
        let wildcard = vec![recorder(&log, "wild", Disposition::Continue)];
        let outcome = dispatch(&typed, &wildcard, &event("x"));
        assert_eq!(*log.lock(), vec!["a", "b"]);
        assert!(outcome.propagation_stopped);
    }

    #[test]
    fn stop_immediate_halts_everything() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let typed = vec![
            recorder(&log, "a", Disposition::StopImmediate),
            recorder(&log, "b", Disposition::Continue),
        ];
        let wildcard = vec![recorder(&log, "wild", Disposition::Continue)];
        let outcome = dispatch(&typed, &wildcard, &event("x"));
        assert_eq!(*log.lock(), vec!["a"]);
        assert_eq!(outcome.invoked, 1);
    }

    #[test]
    fn prevent_default_keeps_dispatching() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let typed = vec![recorder(&log, "a", Disposition::PreventDefault)];
        let wildcard = vec![recorder(&log, "wild", Disposition::Continue)];
        let outcome = dispatch(&typed, &wildcard, &event("x"));
        assert_eq!(*log.lock(), vec!["a", "wild"]);
        assert!(outcome.default_prevented);
        assert!(!outcome.propagation_stopped);
    }

    #[test]
    fn listener_set_snapshot_filters_by_type() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut set = ListenerSet::default();
        let _ = set.add(Some("a"), recorder(&log, "a", Disposition::Continue));
        let _ = set.add(Some("b"), recorder(&log, "b", Disposition::Continue));
        let wild = set.add(None, recorder(&log, "w", Disposition::Continue));

        let (typed, wildcard) = set.snapshot("a");
        assert_eq!(typed.len(), 1);
        assert_eq!(wildcard.len(), 1);

        assert!(set.remove(wild));
        assert!(!set.remove(wild));
        assert!(set.snapshot("a").1.is_empty());
    }

    #[test]
    fn respond_with_without_ports_returns_false() {
        let ev = event("x");
        assert!(!ev.expects_reply());
        assert!(!ev.respond_with(json!("ignored")));
    }
}
