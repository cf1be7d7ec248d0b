//! Server configuration.

use std::time::Duration;

use webflo_http::SessionConfig;
use webflo_messaging::TenancyConfig;
use webflo_settings::WebfloSettings;

/// Everything [`WebfloServer`](crate::WebfloServer) needs to run.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// How long graceful shutdown waits for tasks to drain.
    pub shutdown_timeout: Duration,
    /// Realm of request threads.
    pub realm: String,
    /// Session cookie parameters.
    pub session: SessionConfig,
    /// Tenant and port lifecycle parameters.
    pub tenancy: TenancyConfig,
    /// Outbound frame queue per WebSocket connection.
    pub send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            shutdown_timeout: Duration::from_secs(10),
            realm: "default".into(),
            session: SessionConfig::default(),
            tenancy: TenancyConfig::default(),
            send_queue: 1024,
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &WebfloSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
            realm: settings.thread.realm.clone(),
            session: SessionConfig::from_settings(&settings.session),
            tenancy: TenancyConfig::from_settings(&settings.messaging),
            ..Self::default()
        }
    }

    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
