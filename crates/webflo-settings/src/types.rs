//! Settings type definitions.
//!
//! Field names serialize as camelCase. Every section is `#[serde(default)]`,
//! so a settings file only needs the keys it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "session": { "secret": "s3cr3t", "ttlSecs": 86400 },
///   "messaging": { "requestPortIdleMs": 20000 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebfloSettings {
    /// Port, tenant and channel lifecycle settings.
    pub messaging: MessagingSettings,
    /// Cookie session settings.
    pub session: SessionSettings,
    /// Thread signal store settings.
    pub thread: ThreadSettings,
    /// HTTP server settings.
    pub server: ServerSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Messaging layer settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessagingSettings {
    /// Idle eviction for session-scoped client port lists.
    pub client_port_idle_ms: u64,
    /// Idle eviction for per-tenant request ports.
    pub request_port_idle_ms: u64,
    /// Ring size of each broadcast channel.
    pub broadcast_capacity: usize,
    /// Whether gateway-created ports wait for a handshake before flushing.
    pub handshake: bool,
}

impl MessagingSettings {
    /// Client port idle timeout as a [`Duration`].
    pub fn client_port_idle(&self) -> Duration {
        Duration::from_millis(self.client_port_idle_ms)
    }

    /// Request port idle timeout as a [`Duration`].
    pub fn request_port_idle(&self) -> Duration {
        Duration::from_millis(self.request_port_idle_ms)
    }
}

impl Default for MessagingSettings {
    fn default() -> Self {
        Self {
            client_port_idle_ms: 10_000,
            request_port_idle_ms: 15_000,
            broadcast_capacity: 256,
            handshake: false,
        }
    }
}

/// Cookie session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Name of the cookie carrying the session ID.
    pub cookie_name: String,
    /// HMAC secret for signing session IDs. Unsigned IDs when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// `Max-Age` of the session cookie, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cookie_name: "__sessid".to_string(),
            secret: None,
            ttl_secs: None,
        }
    }
}

/// Thread signal store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadSettings {
    /// Realm segment of generated thread IDs (`wq.<realm>.<uuid>`).
    pub realm: String,
}

impl Default for ThreadSettings {
    fn default() -> Self {
        Self {
            realm: "default".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// How long graceful shutdown waits for tasks to drain.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(WebfloSettings::default()).unwrap();
        assert_eq!(json["messaging"]["clientPortIdleMs"], 10_000);
        assert_eq!(json["messaging"]["requestPortIdleMs"], 15_000);
        assert_eq!(json["session"]["cookieName"], "__sessid");
        assert!(json["session"].get("secret").is_none());
        assert_eq!(json["server"]["shutdownTimeoutSecs"], 10);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: WebfloSettings =
            serde_json::from_str(r#"{"session":{"secret":"abc"}}"#).unwrap();
        assert_eq!(settings.session.secret.as_deref(), Some("abc"));
        assert_eq!(settings.session.cookie_name, "__sessid");
        assert_eq!(settings.messaging.broadcast_capacity, 256);
    }

    #[test]
    fn durations() {
        let m = MessagingSettings::default();
        assert_eq!(m.client_port_idle(), Duration::from_secs(10));
        assert_eq!(m.request_port_idle(), Duration::from_secs(15));
    }
}
