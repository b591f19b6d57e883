//! The `{event, data}` record exchanged in both directions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fired by the hub when a session is admitted.
pub const CONNECT_EVENT: &str = "connect";

/// Fired by the hub when a session is removed.
pub const DISCONNECT_EVENT: &str = "disconnect";

/// Whether `event` is one of the lifecycle names only the hub may dispatch.
pub fn is_reserved_event(event: &str) -> bool {
    event == CONNECT_EVENT || event == DISCONNECT_EVENT
}

/// A named event with an arbitrary JSON payload.
///
/// A frame without a `data` field decodes with `data == Value::Null`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Event name used for dispatch.
    pub event: String,
    /// Uninterpreted payload.
    #[serde(default)]
    pub data: Value,
}

impl EventMessage {
    /// Build a message from an event name and payload.
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse one inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
