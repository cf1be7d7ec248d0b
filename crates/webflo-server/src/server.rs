//! `WebfloServer`: axum HTTP + `WebSocket` front of the tenant registry.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::{Json, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use webflo_core::{IdGenerator, KvStore, MemoryStore, TenantId, UuidGenerator};
use webflo_http::ThreadStore;
use webflo_messaging::{ChannelRegistry, ChannelScope, TenantRegistry};

use crate::config::ServerConfig;
use crate::errors::Result;
use crate::health::{self, HealthResponse};
use crate::middleware::request_state;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live tenants.
    pub tenants: Arc<TenantRegistry>,
    /// Process-wide broadcast channels.
    pub channels: Arc<ChannelRegistry>,
    /// Backing store of server-side sessions.
    pub session_store: Arc<dyn KvStore>,
    /// Request threads, locked per thread ID across requests.
    pub threads: ThreadStore,
    /// Source of session, thread and endpoint IDs.
    pub ids: Arc<dyn IdGenerator>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

/// The Webflo server.
pub struct WebfloServer {
    state: AppState,
}

impl WebfloServer {
    /// Create a server with in-memory stores.
    pub fn new(config: ServerConfig) -> Self {
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);
        let tenants = TenantRegistry::new(config.tenancy.clone()).with_id_generator(ids.clone());
        let channels = ChannelRegistry::new(ChannelScope::Global, config.tenancy.broadcast_capacity);
        Self {
            state: AppState {
                tenants: Arc::new(tenants),
                channels: Arc::new(channels),
                session_store: Arc::new(MemoryStore::new()),
                threads: ThreadStore::new(Arc::new(MemoryStore::new())).with_id_generator(ids.clone()),
                ids,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
            },
        }
    }

    /// Use `session_store` and `thread_store` as backing stores.
    #[must_use]
    pub fn with_stores(mut self, session_store: Arc<dyn KvStore>, thread_store: Arc<dyn KvStore>) -> Self {
        self.state.session_store = session_store;
        self.state.threads = ThreadStore::new(thread_store).with_id_generator(self.state.ids.clone());
        self
    }

    /// Use `ids` for every generated ID. Resets the tenant registry.
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        let tenants = TenantRegistry::new(self.state.config.tenancy.clone()).with_id_generator(ids.clone());
        self.state.tenants = Arc::new(tenants);
        self.state.threads = self.state.threads.clone().with_id_generator(ids.clone());
        self.state.ids = ids;
        self
    }

    /// Router with the built-in routes.
    pub fn router(&self) -> Router {
        self.router_with(Router::new())
    }

    /// Merge the built-in routes into `app` and wrap it with per-request
    /// session and thread state.
    pub fn router_with(&self, app: Router<AppState>) -> Router {
        app.route("/health", get(health_handler))
            .route("/ws/{tenant}", get(ws_handler))
            .layer(axum::middleware::from_fn_with_state(
                self.state.clone(),
                request_state,
            ))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve until shutdown. Returns the bound address.
    pub async fn listen(&self) -> Result<SocketAddr> {
        self.listen_with(self.router()).await
    }

    /// Bind and serve `router` until shutdown.
    pub async fn listen_with(&self, router: Router) -> Result<SocketAddr> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let token = self.state.shutdown.token();
        self.state.shutdown.spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown(token.cancelled_owned());
            if let Err(error) = serve.await {
                warn!(%error, "server exited with error");
            }
        });
        info!(%addr, "listening");
        Ok(addr)
    }

    /// Drain in-flight work, then close every tenant and channel.
    pub async fn shutdown(&self) {
        self.state
            .shutdown
            .graceful_shutdown(self.state.config.shutdown_timeout)
            .await;
        self.state.tenants.close_all();
        self.state.channels.close_all();
        info!("server stopped");
    }

    /// Shared handler state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Live tenants.
    pub fn tenants(&self) -> &Arc<TenantRegistry> {
        &self.state.tenants
    }

    /// Process-wide broadcast channels.
    pub fn channels(&self) -> &Arc<ChannelRegistry> {
        &self.state.channels
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, state.tenants.len()))
}

/// GET /ws/{tenant}
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(tenant): Path<String>,
    State(state): State<AppState>,
) -> Result<Response> {
    let tenant_id = TenantId::parse(&tenant)?;
    Ok(ws.on_upgrade(move |socket| websocket::run_ws_session(socket, tenant_id, state)))
}
