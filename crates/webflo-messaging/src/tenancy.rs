//! Tenants and the tenant registry.
//!
//! A [`Tenant`] groups everything belonging to one client session or worker
//! realm: a [`StarPort`] hub over its client ports, a registry of
//! short-lived request ports, and its own named broadcast channels. When the
//! hub closes (its last client left) the tenant closes and drops out of the
//! [`TenantRegistry`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};
use webflo_core::{IdGenerator, PortId, TenantId, UuidGenerator};
use webflo_settings::MessagingSettings;

use crate::channels::{BroadcastChannel, ChannelRegistry, ChannelScope, DEFAULT_CAPACITY};
use crate::port::{MessagePort, PortOptions};
use crate::registry::PortRegistry;
use crate::star::StarPort;
use crate::transport::{MessageTransport, PipeEnd};

/// Lifecycle parameters shared by every tenant of a registry.
#[derive(Clone, Debug)]
pub struct TenancyConfig {
    /// Idle timeout for client ports.
    pub client_port_idle: Duration,
    /// Idle timeout for request ports.
    pub request_port_idle: Duration,
    /// Ring size of tenant broadcast channels.
    pub broadcast_capacity: usize,
    /// Options for ports the tenant creates.
    pub port_options: PortOptions,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            client_port_idle: Duration::from_secs(10),
            request_port_idle: Duration::from_secs(15),
            broadcast_capacity: DEFAULT_CAPACITY,
            port_options: PortOptions::default(),
        }
    }
}

impl TenancyConfig {
    /// Build from the `messaging` settings section.
    pub fn from_settings(settings: &MessagingSettings) -> Self {
        Self {
            client_port_idle: settings.client_port_idle(),
            request_port_idle: settings.request_port_idle(),
            broadcast_capacity: settings.broadcast_capacity,
            port_options: PortOptions {
                handshake: settings.handshake,
                ..PortOptions::default()
            },
        }
    }
}

type CloseHook = Box<dyn FnOnce() + Send>;

/// A logical grouping of ports and channels.
pub struct Tenant {
    id: TenantId,
    hub: Arc<StarPort>,
    client_ports: PortRegistry,
    request_ports: PortRegistry,
    channels: Arc<ChannelRegistry>,
    port_options: PortOptions,
    closed: AtomicBool,
    on_close: Mutex<Vec<CloseHook>>,
}

impl Tenant {
    /// Create a tenant. It closes itself when its hub closes.
    pub fn new(id: TenantId, config: &TenancyConfig, ids: Arc<dyn IdGenerator>) -> Arc<Self> {
        let channels = Arc::new(ChannelRegistry::new(
            ChannelScope::Tenant(id.clone()),
            config.broadcast_capacity,
        ));
        let client_ports = PortRegistry::new(Some(config.client_port_idle))
            .with_id_generator(ids.clone())
            .with_channels(channels.clone())
            .with_port_options(config.port_options.clone());
        let request_ports = PortRegistry::new(Some(config.request_port_idle))
            .with_id_generator(ids)
            .with_channels(channels.clone())
            .with_port_options(config.port_options.clone());

        let tenant = Arc::new(Self {
            id,
            hub: StarPort::new(true),
            client_ports,
            request_ports,
            channels,
            port_options: config.port_options.clone(),
            closed: AtomicBool::new(false),
            on_close: Mutex::new(Vec::new()),
        });
        spawn_hub_watch(Arc::downgrade(&tenant), tenant.hub.clone());
        tenant
    }

    /// Tenant identifier.
    pub fn id(&self) -> &TenantId {
        &self.id
    }

    /// The hub over this tenant's client ports.
    pub fn hub(&self) -> &Arc<StarPort> {
        &self.hub
    }

    /// Whether the tenant has closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a client connection over `transport` and join it to the hub.
    pub fn add_client(&self, transport: Arc<dyn MessageTransport>) -> Arc<MessagePort> {
        let id = self.client_ports.generate_id();
        let port = self
            .client_ports
            .attach(id, transport, self.port_options.clone());
        let _ = self.hub.add_port(port.clone());
        port
    }

    /// Create a client port over an in-process pipe and join it to the hub.
    pub fn create_client_port(&self) -> (Arc<MessagePort>, PipeEnd) {
        let (port, remote) = self.client_ports.create_port();
        let _ = self.hub.add_port(port.clone());
        (port, remote)
    }

    /// Look up a client port.
    pub fn get_client_port(&self, id: &PortId) -> Option<Arc<MessagePort>> {
        self.client_ports.get_port(id)
    }

    /// Number of live client ports.
    pub fn client_count(&self) -> usize {
        self.client_ports.len()
    }

    /// Look up a request port.
    pub fn get_request_port(&self, id: &PortId) -> Option<Arc<MessagePort>> {
        self.request_ports.get_port(id)
    }

    /// Create a request port, under `id` when given, for `url`.
    ///
    /// The port is evicted once idle for the request-port timeout.
    pub fn create_request_port(&self, id: Option<PortId>, url: Option<String>) -> (Arc<MessagePort>, PipeEnd) {
        let options = PortOptions {
            url,
            ..self.port_options.clone()
        };
        let id = id.unwrap_or_else(|| self.request_ports.generate_id());
        self.request_ports.create_port_with_id(id, options)
    }

    /// The tenant's channel named `name`, created when `auto_create` is set.
    ///
    /// Returns `None` once the tenant has closed.
    pub fn get_channel(&self, name: &str, auto_create: bool) -> Option<Arc<BroadcastChannel>> {
        if self.is_closed() {
            return None;
        }
        self.channels.get_channel(name, auto_create)
    }

    /// Close the tenant with everything it owns. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.hub.close();
        self.client_ports.close_all();
        self.request_ports.close_all();
        self.channels.close_all();
        let hooks = std::mem::take(&mut *self.on_close.lock());
        for hook in hooks {
            hook();
        }
        info!(tenant_id = %self.id, "tenant closed");
    }

    fn on_close(&self, hook: CloseHook) {
        self.on_close.lock().push(hook);
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("id", &self.id)
            .field("clients", &self.client_ports.len())
            .field("request_ports", &self.request_ports.len())
            .field("channels", &self.channels.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn spawn_hub_watch(tenant: Weak<Tenant>, hub: Arc<StarPort>) {
    drop(tokio::spawn(async move {
        hub.closed().await;
        if let Some(tenant) = tenant.upgrade() {
            debug!(tenant_id = %tenant.id, "hub closed, closing tenant");
            tenant.close();
        }
    }));
}

type TenantMap = DashMap<TenantId, Arc<Tenant>>;

/// Registry of live tenants.
pub struct TenantRegistry {
    tenants: Arc<TenantMap>,
    config: TenancyConfig,
    ids: Arc<dyn IdGenerator>,
}

impl TenantRegistry {
    /// Create an empty registry.
    pub fn new(config: TenancyConfig) -> Self {
        Self {
            tenants: Arc::new(DashMap::new()),
            config,
            ids: Arc::new(UuidGenerator),
        }
    }

    /// Use `ids` for port IDs generated inside tenants.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Look up a tenant, creating it when absent and `auto_create` is set.
    ///
    /// A created tenant deregisters itself when it closes.
    pub fn get_tenant(&self, id: &TenantId, auto_create: bool) -> Option<Arc<Tenant>> {
        if let Some(existing) = self.tenants.get(id) {
            return Some(existing.value().clone());
        }
        if !auto_create {
            return None;
        }

        let mut created = None;
        let tenant = self
            .tenants
            .entry(id.clone())
            .or_insert_with(|| {
                let tenant = Tenant::new(id.clone(), &self.config, self.ids.clone());
                created = Some(tenant.clone());
                tenant
            })
            .value()
            .clone();

        if let Some(tenant) = created {
            let registry = Arc::downgrade(&self.tenants);
            let weak_tenant = Arc::downgrade(&tenant);
            let key = id.clone();
            tenant.on_close(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    let _ = registry.remove_if(&key, |_, t| {
                        weak_tenant.upgrade().is_some_and(|w| Arc::ptr_eq(t, &w))
                    });
                }
            }));
            info!(tenant_id = %id, "tenant created");
        }
        Some(tenant)
    }

    /// Number of live tenants.
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether no tenant is live.
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// IDs of the live tenants.
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.tenants.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Close every tenant.
    pub fn close_all(&self) {
        let tenants: Vec<Arc<Tenant>> = self.tenants.iter().map(|e| e.value().clone()).collect();
        for tenant in tenants {
            tenant.close();
        }
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new(TenancyConfig::default())
    }
}

impl fmt::Debug for TenantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantRegistry")
            .field("tenants", &self.tenant_ids())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
