//! Port registry with idle eviction.
//!
//! Every registered port gets a watcher task following its [`PortStatus`]:
//!
//! ```text
//! pending > 0 ──────────────► wait for any change (never evicted)
//! pending == 0, idle set ───► wait up to `idle` for a change
//!                                 └─ timeout ─► close + deregister
//! closed ───────────────────► deregister
//! ```
//!
//! Any status change (send, delivery, [`MessagePort::touch`]) re-arms the
//! idle timer.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;
use webflo_core::{IdGenerator, PortId, UuidGenerator};

use crate::channels::{BroadcastChannel, ChannelFactory, ChannelRegistry};
use crate::port::{MessagePort, PortOptions, PortStatus};
use crate::transport::{MessagePipe, MessageTransport, PipeEnd};

type PortMap = DashMap<PortId, Arc<MessagePort>>;

/// Tracks ports by ID; creates, looks up and evicts idle ones.
pub struct PortRegistry {
    ports: Arc<PortMap>,
    idle_timeout: Option<Duration>,
    ids: Arc<dyn IdGenerator>,
    channels: Arc<dyn ChannelFactory>,
    port_options: PortOptions,
}

impl PortRegistry {
    /// Create a registry evicting ports idle for `idle_timeout`.
    ///
    /// `None` disables idle eviction; ports then leave only when closed.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            ports: Arc::new(DashMap::new()),
            idle_timeout,
            ids: Arc::new(UuidGenerator),
            channels: ChannelRegistry::global(),
            port_options: PortOptions::default(),
        }
    }

    /// Use `ids` for generated port IDs.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Resolve broadcast channels through `channels`.
    #[must_use]
    pub fn with_channels(mut self, channels: Arc<dyn ChannelFactory>) -> Self {
        self.channels = channels;
        self
    }

    /// Options applied to ports this registry creates.
    #[must_use]
    pub fn with_port_options(mut self, options: PortOptions) -> Self {
        self.port_options = options;
        self
    }

    /// Idle timeout, if eviction is enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// Create a port with a fresh ID.
    ///
    /// Returns the registered port and the far end of its pipe, which the
    /// caller hands to the peer.
    pub fn create_port(&self) -> (Arc<MessagePort>, PipeEnd) {
        self.create_port_with_id(self.generate_id(), self.port_options.clone())
    }

    /// A fresh port ID from this registry's generator.
    pub fn generate_id(&self) -> PortId {
        PortId::from(self.ids.generate())
    }

    /// Create a port under a caller-chosen ID.
    ///
    /// A port already registered under `id` is closed and replaced.
    pub fn create_port_with_id(&self, id: PortId, options: PortOptions) -> (Arc<MessagePort>, PipeEnd) {
        let (local, remote) = MessagePipe::pair();
        let port = self.attach(id, Arc::new(local), options);
        (port, remote)
    }

    /// Register a port over an existing transport.
    pub fn attach(
        &self,
        id: PortId,
        transport: Arc<dyn MessageTransport>,
        options: PortOptions,
    ) -> Arc<MessagePort> {
        let port = MessagePort::connect(id.clone(), transport, options);
        if let Some(previous) = self.ports.insert(id.clone(), port.clone()) {
            debug!(port_id = %id, "replacing registered port");
            previous.close();
        }
        spawn_watcher(
            Arc::downgrade(&self.ports),
            Arc::downgrade(&port),
            port.subscribe_status(),
            self.idle_timeout,
        );
        debug!(port_id = %id, registered = self.ports.len(), "port registered");
        port
    }

    /// Look up a port.
    pub fn get_port(&self, id: &PortId) -> Option<Arc<MessagePort>> {
        self.ports.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Whether no port is registered.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// IDs of the registered ports.
    pub fn port_ids(&self) -> Vec<PortId> {
        let mut ids: Vec<PortId> = self.ports.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// The channel named `name` in this registry's scope, shared by every
    /// caller asking for the same name.
    pub fn create_broadcast_channel(&self, name: &str) -> Arc<BroadcastChannel> {
        self.channels.channel(name)
    }

    /// Close and deregister every port.
    pub fn close_all(&self) {
        let ports: Vec<Arc<MessagePort>> = self.ports.iter().map(|e| e.value().clone()).collect();
        self.ports.clear();
        for port in ports {
            port.close();
        }
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRegistry")
            .field("ports", &self.ports.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

fn spawn_watcher(
    ports: Weak<PortMap>,
    port: Weak<MessagePort>,
    mut status: watch::Receiver<PortStatus>,
    idle: Option<Duration>,
) {
    drop(tokio::spawn(async move {
        loop {
            let current = *status.borrow_and_update();
            if current.closed {
                break;
            }
            match idle {
                Some(idle) if current.pending == 0 => {
                    match tokio::time::timeout(idle, status.changed()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => break,
                        Err(_) => {
                            if let Some(port) = port.upgrade() {
                                debug!(port_id = %port.id(), idle_ms = idle.as_millis(), "evicting idle port");
                                port.close();
                            }
                            break;
                        }
                    }
                }
                _ => {
                    if status.changed().await.is_err() {
                        break;
                    }
                }
            }
        }
        deregister(&ports, &port);
    }));
}

fn deregister(ports: &Weak<PortMap>, port: &Weak<MessagePort>) {
    let (Some(ports), Some(port)) = (ports.upgrade(), port.upgrade()) else {
        return;
    };
    let _ = ports.remove_if(port.id(), |_, registered| Arc::ptr_eq(registered, &port));
}
