//! Star-topology hub over many ports.

use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use webflo_core::PortId;

use crate::errors::{MessagingError, Result};
use crate::event::{Disposition, Listener, ListenerId, ListenerSet, MessageEvent, dispatch};
use crate::port::MessagePort;

struct Member {
    port: Arc<MessagePort>,
    forwarder: ListenerId,
}

#[derive(Default)]
struct HubState {
    members: Vec<Member>,
    listeners: ListenerSet,
    default_handler: Option<Listener>,
    had_members: bool,
    closed: bool,
}

/// A hub that fans out to every member port and re-dispatches every
/// member's inbound events to its own listeners.
///
/// With auto-close set, the hub closes once its last member leaves.
pub struct StarPort {
    auto_close: bool,
    state: Mutex<HubState>,
    closed: watch::Sender<bool>,
}

impl StarPort {
    /// Create an empty hub.
    pub fn new(auto_close: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_close,
            state: Mutex::new(HubState::default()),
            closed: watch::Sender::new(false),
        })
    }

    /// Join `port` to the hub.
    ///
    /// A hub that is already closed closes the port instead and returns
    /// `false`. The port leaves the hub when it closes.
    pub fn add_port(self: &Arc<Self>, port: Arc<MessagePort>) -> bool {
        let hub = Arc::downgrade(self);
        let forwarder = port.add_wildcard_listener(move |event: &MessageEvent| {
            if let Some(hub) = hub.upgrade() {
                hub.redispatch(event);
            }
            Disposition::Continue
        });

        {
            let mut state = self.state.lock();
            if state.closed {
                drop(state);
                let _ = port.remove_listener(forwarder);
                port.close();
                return false;
            }
            state.had_members = true;
            state.members.push(Member {
                port: port.clone(),
                forwarder,
            });
        }

        spawn_departure_watch(Arc::downgrade(self), port);
        true
    }

    /// Detach a member without closing it.
    pub fn remove_port(&self, id: &PortId) -> Option<Arc<MessagePort>> {
        let (removed, now_empty) = {
            let mut state = self.state.lock();
            let index = state.members.iter().position(|m| m.port.id() == id)?;
            let member = state.members.remove(index);
            (member, state.members.is_empty())
        };
        let _ = removed.port.remove_listener(removed.forwarder);
        debug!(port_id = %id, "port left hub");

        if now_empty && self.auto_close {
            self.close();
        }
        Some(removed.port)
    }

    /// Current members.
    pub fn ports(&self) -> Vec<Arc<MessagePort>> {
        self.state
            .lock()
            .members
            .iter()
            .map(|m| m.port.clone())
            .collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    /// Whether the hub has no members.
    pub fn is_empty(&self) -> bool {
        self.state.lock().members.is_empty()
    }

    /// Post to every member. Returns how many accepted the message.
    pub fn post_message(&self, message_type: &str, data: &Value) -> usize {
        self.ports()
            .iter()
            .filter(|port| port.post_message(message_type, data.clone()).is_ok())
            .count()
    }

    /// Send a request to every member; `on_response` runs for each response.
    pub fn post_request<F>(&self, message_type: &str, data: &Value, on_response: F) -> usize
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        let on_response = Arc::new(on_response);
        self.ports()
            .iter()
            .filter(|port| {
                let on_response = on_response.clone();
                port.post_request(message_type, data.clone(), move |event| on_response(event))
                    .is_ok()
            })
            .count()
    }

    /// Query every member and resolve with the first response.
    pub async fn query(&self, message_type: &str, data: Value) -> Result<MessageEvent> {
        let queries: Vec<BoxFuture<'static, Result<MessageEvent>>> = self
            .ports()
            .into_iter()
            .map(|port| {
                let message_type = message_type.to_owned();
                let data = data.clone();
                let query: BoxFuture<'static, Result<MessageEvent>> =
                    Box::pin(async move { port.query(&message_type, data).await });
                query
            })
            .collect();
        if queries.is_empty() {
            return Err(MessagingError::NoResponse);
        }
        future::select_ok(queries).await.map(|(event, _)| event)
    }

    /// Listen for `message_type` events arriving on any member.
    pub fn add_listener<F>(&self, message_type: &str, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) -> Disposition + Send + Sync + 'static,
    {
        self.state
            .lock()
            .listeners
            .add(Some(message_type), Arc::new(listener))
    }

    /// Listen for every event arriving on any member.
    pub fn add_wildcard_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) -> Disposition + Send + Sync + 'static,
    {
        self.state.lock().listeners.add(None, Arc::new(listener))
    }

    /// Remove a hub listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state.lock().listeners.remove(id)
    }

    /// Handler run after the hub listeners unless one prevented it.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&MessageEvent) -> Disposition + Send + Sync + 'static,
    {
        self.state.lock().default_handler = Some(Arc::new(handler));
    }

    /// Close the hub and every member. Idempotent.
    pub fn close(&self) {
        let members = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            std::mem::take(&mut state.members)
        };
        for member in &members {
            let _ = member.port.remove_listener(member.forwarder);
            member.port.close();
        }
        let _ = self.closed.send_replace(true);
        debug!(members = members.len(), "hub closed");
    }

    /// Whether the hub has closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the hub closes.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Whether any member ever joined.
    pub fn had_members(&self) -> bool {
        self.state.lock().had_members
    }

    fn redispatch(&self, event: &MessageEvent) {
        let ((typed, wildcard), default_handler) = {
            let state = self.state.lock();
            (
                state.listeners.snapshot(&event.message_type),
                state.default_handler.clone(),
            )
        };
        let outcome = dispatch(&typed, &wildcard, event);
        if !outcome.default_prevented {
            if let Some(handler) = default_handler {
                let _ = handler(event);
            }
        }
    }
}

impl fmt::Debug for StarPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StarPort")
            .field("members", &self.len())
            .field("auto_close", &self.auto_close)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn spawn_departure_watch(hub: Weak<StarPort>, port: Arc<MessagePort>) {
    drop(tokio::spawn(async move {
        port.closed().await;
        if let Some(hub) = hub.upgrade() {
            let _ = hub.remove_port(port.id());
        }
    }));
}
