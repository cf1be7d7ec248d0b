//! Named broadcast channels.
//!
//! A channel is identified by `(scope, name)`. Every requester asking a
//! [`ChannelRegistry`] for the same name gets the same [`BroadcastChannel`]
//! instance for as long as the channel is open; closing it deregisters it.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webflo_core::{IdGenerator, TenantId, UuidGenerator};

use crate::envelope::Envelope;
use crate::errors::MessagingError;
use crate::transport::{Inbox, MessageTransport};

/// Default ring size of a broadcast channel.
pub const DEFAULT_CAPACITY: usize = 256;

/// Where a channel name is resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    /// Process-wide, outside any tenant.
    Global,
    /// Private to one tenant.
    Tenant(TenantId),
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Tenant(id) => write!(f, "tenant:{id}"),
        }
    }
}

/// Source of memoized named channels.
pub trait ChannelFactory: Send + Sync {
    /// The channel registered under `name`, created on first request.
    fn channel(&self, name: &str) -> Arc<BroadcastChannel>;
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// A named many-to-many channel.
pub struct BroadcastChannel {
    name: String,
    scope: ChannelScope,
    sender: broadcast::Sender<Envelope>,
    cancel: CancellationToken,
    on_close: Mutex<Vec<CloseHook>>,
}

impl BroadcastChannel {
    /// Create a standalone channel.
    pub fn new(name: impl Into<String>, scope: ChannelScope, capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self {
            name: name.into(),
            scope,
            sender,
            cancel: CancellationToken::new(),
            on_close: Mutex::new(Vec::new()),
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel scope.
    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    /// Create a transport endpoint attached to this channel.
    pub fn endpoint(self: &Arc<Self>) -> BroadcastEndpoint {
        BroadcastEndpoint {
            id: UuidGenerator.generate(),
            channel: self.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    /// Publish a message to every endpoint currently listening.
    ///
    /// Returns the number of receivers it reached.
    pub fn post(&self, message_type: &str, data: Value) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.sender
            .send(Envelope::message(message_type, data))
            .unwrap_or(0)
    }

    /// Number of endpoints listening.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Close the channel and every endpoint attached to it.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let hooks = std::mem::take(&mut *self.on_close.lock());
        for hook in hooks {
            hook();
        }
        debug!(channel = %self.name, scope = %self.scope, "broadcast channel closed");
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn on_close(&self, hook: CloseHook) {
        self.on_close.lock().push(hook);
    }
}

impl fmt::Debug for BroadcastChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastChannel")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Transport endpoint on a [`BroadcastChannel`].
///
/// Envelopes reach every other endpoint on the channel. A receiver that falls
/// more than the channel capacity behind skips the missed envelopes.
pub struct BroadcastEndpoint {
    id: String,
    channel: Arc<BroadcastChannel>,
    cancel: CancellationToken,
}

impl BroadcastEndpoint {
    /// The channel this endpoint belongs to.
    pub fn channel(&self) -> &Arc<BroadcastChannel> {
        &self.channel
    }
}

impl MessageTransport for BroadcastEndpoint {
    fn endpoint_id(&self) -> &str {
        &self.id
    }

    fn send(&self, mut envelope: Envelope) -> crate::Result<()> {
        if self.is_closed() {
            return Err(MessagingError::Closed);
        }
        envelope.origin = Some(self.id.clone());
        // No receivers is not a failure on a broadcast medium.
        let _ = self.channel.sender.send(envelope);
        Ok(())
    }

    fn on_message(&self, inbox: Inbox) {
        if self.is_closed() {
            return;
        }
        let mut rx = self.channel.sender.subscribe();
        let cancel = self.cancel.clone();
        let id = self.id.clone();
        let channel = self.channel.name.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(envelope) => {
                            if envelope.origin.as_deref() == Some(id.as_str()) {
                                continue;
                            }
                            if inbox.send(envelope).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel, endpoint = %id, skipped, "broadcast receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        }));
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn is_shared(&self) -> bool {
        true
    }
}

impl Drop for BroadcastEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Memoizing registry of channels within one scope.
pub struct ChannelRegistry {
    scope: ChannelScope,
    capacity: usize,
    channels: Arc<DashMap<String, Arc<BroadcastChannel>>>,
}

impl ChannelRegistry {
    /// Create an empty registry for `scope`.
    pub fn new(scope: ChannelScope, capacity: usize) -> Self {
        Self {
            scope,
            capacity,
            channels: Arc::new(DashMap::new()),
        }
    }

    /// The process-wide registry for channels outside any tenant.
    pub fn global() -> Arc<ChannelRegistry> {
        static GLOBAL: OnceLock<Arc<ChannelRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(ChannelRegistry::new(ChannelScope::Global, DEFAULT_CAPACITY)))
            .clone()
    }

    /// Scope of this registry.
    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    /// Look up `name`, creating it when absent and `auto_create` is set.
    pub fn get_channel(&self, name: &str, auto_create: bool) -> Option<Arc<BroadcastChannel>> {
        if let Some(existing) = self.channels.get(name) {
            return Some(existing.value().clone());
        }
        auto_create.then(|| self.open(name))
    }

    /// Names of the open channels.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of open channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether no channel is open.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Close and deregister every channel.
    pub fn close_all(&self) {
        let channels: Vec<Arc<BroadcastChannel>> =
            self.channels.iter().map(|e| e.value().clone()).collect();
        for channel in channels {
            channel.close();
        }
    }

    fn open(&self, name: &str) -> Arc<BroadcastChannel> {
        let mut created = None;
        let channel = self
            .channels
            .entry(name.to_owned())
            .or_insert_with(|| {
                let channel = BroadcastChannel::new(name, self.scope.clone(), self.capacity);
                created = Some(channel.clone());
                channel
            })
            .value()
            .clone();

        if let Some(channel) = created {
            let registry: Weak<DashMap<String, Arc<BroadcastChannel>>> =
                Arc::downgrade(&self.channels);
            let key = name.to_owned();
            let weak_channel = Arc::downgrade(&channel);
            channel.on_close(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    let _ = registry.remove_if(&key, |_, c| {
                        weak_channel.upgrade().is_some_and(|w| Arc::ptr_eq(c, &w))
                    });
                }
            }));
            debug!(channel = name, scope = %self.scope, "broadcast channel created");
        }
        channel
    }
}

impl ChannelFactory for ChannelRegistry {
    fn channel(&self, name: &str) -> Arc<BroadcastChannel> {
        match self.get_channel(name, false) {
            Some(channel) => channel,
            None => self.open(name),
        }
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("scope", &self.scope)
            .field("channels", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::new(ChannelScope::Tenant(TenantId::from("t1")), 16)
    }

    #[test]
    fn same_name_returns_same_instance() {
        let reg = registry();
        let a = reg.get_channel("lobby", true).unwrap();
        let b = reg.get_channel("lobby", true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert!(Arc::ptr_eq(&a, &reg.channel("lobby")));
    }

    #[test]
    fn lookup_without_auto_create() {
        let reg = registry();
        assert!(reg.get_channel("lobby", false).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn closing_deregisters() {
        let reg = registry();
        let a = reg.get_channel("lobby", true).unwrap();
        a.close();
        assert!(a.is_closed());
        assert!(reg.get_channel("lobby", false).is_none());

        let b = reg.get_channel("lobby", true).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn close_all_empties_registry() {
        let reg = registry();
        let _ = reg.get_channel("a", true);
        let _ = reg.get_channel("b", true);
        assert_eq!(reg.names(), vec!["a".to_string(), "b".to_string()]);
        reg.close_all();
        assert!(reg.is_empty());
    }

    #[test]
    fn scope_display() {
        assert_eq!(ChannelScope::Global.to_string(), "global");
        assert_eq!(
            ChannelScope::Tenant(TenantId::from("t1")).to_string(),
            "tenant:t1"
        );
    }

    #[tokio::test]
    async fn endpoints_hear_each_other_but_not_themselves() {
        let channel = BroadcastChannel::new("news", ChannelScope::Global, 16);
        let a = channel.endpoint();
        let b = channel.endpoint();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        a.on_message(a_tx);
        b.on_message(b_tx);
        assert_eq!(channel.subscriber_count(), 2);

        a.send(Envelope::message("headline", json!("x"))).unwrap();
        let got = b_rx.recv().await.unwrap();
        assert_eq!(got.message_type, "headline");

        assert_eq!(channel.post("bulletin", json!(null)), 2);
        assert_eq!(a_rx.recv().await.unwrap().message_type, "bulletin");
        assert_eq!(b_rx.recv().await.unwrap().message_type, "bulletin");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closing_channel_ends_endpoint_inboxes() {
        let channel = BroadcastChannel::new("news", ChannelScope::Global, 16);
        let a = channel.endpoint();
        let (tx, mut rx) = mpsc::unbounded_channel();
        a.on_message(tx);

        channel.close();
        assert!(a.is_closed());
        assert!(rx.recv().await.is_none());
        assert_eq!(channel.post("late", json!(null)), 0);
    }
}
