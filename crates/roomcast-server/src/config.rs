//! Server configuration.

use roomcast_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the event hub server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route the WebSocket upgrade is mounted at.
    pub path: String,
    /// Bounded outbound queue length per session.
    pub queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Dispatch peer-sent `connect`/`disconnect` events like any other.
    pub allow_reserved_events: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/socket".into(),
            queue_capacity: 256,
            max_message_size: 1024 * 1024, // 1 MB
            allow_reserved_events: false,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            path: settings.path.clone(),
            queue_capacity: settings.queue_capacity.max(1),
            max_message_size: settings.max_message_size,
            allow_reserved_events: settings.allow_reserved_events,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
