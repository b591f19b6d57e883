//! Server network and hub settings.

use serde::{Deserialize, Serialize};

/// Where the hub listens and how it treats each session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Route the WebSocket upgrade is mounted at.
    pub path: String,
    /// Outbound messages buffered per session before it is shed.
    pub queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Let peers send events named `connect`/`disconnect`.
    pub allow_reserved_events: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/socket".to_string(),
            queue_capacity: 256,
            max_message_size: 1024 * 1024,
            allow_reserved_events: false,
        }
    }
}
