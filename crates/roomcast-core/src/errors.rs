//! Error taxonomy for the event hub.
//!
//! [`HubError`] covers failures that end a connection or prevent one from
//! being admitted. [`DispatchError`] covers failures contained to a single
//! inbound message; the session keeps running after one.

use thiserror::Error;

/// Any error that can cross task boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Connection-level failures.
#[derive(Debug, Error)]
pub enum HubError {
    /// The auth gate rejected the upgrade request.
    #[error("unauthorized")]
    Unauthorized,

    /// The origin check rejected the upgrade request.
    #[error("origin '{origin}' not allowed")]
    OriginRejected {
        /// Value of the request's `Origin` header.
        origin: String,
    },

    /// The underlying stream failed while reading or writing.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session's outbound queue was full and the session was shed.
    #[error("session {session_id} shed: outbound queue full")]
    Backpressure {
        /// Session that was shed.
        session_id: String,
    },

    /// The hub loop is no longer running.
    #[error("hub is not running")]
    HubClosed,

    /// Binding or serving the HTTP listener failed.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures contained to one inbound message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The frame was not a valid `{event, data}` record.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// The payload did not decode into the handler's declared shape.
    #[error("payload for '{event}' does not decode as {shape}: {source}")]
    Decode {
        /// Event whose payload failed.
        event: String,
        /// Rust type name the handler expects.
        shape: &'static str,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },

    /// The application handler returned an error.
    #[error("handler for '{event}' failed: {source}")]
    Handler {
        /// Event being handled.
        event: String,
        /// Error returned by the handler.
        #[source]
        source: BoxError,
    },
}

impl DispatchError {
    /// Short label used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "malformed_frame",
            Self::Decode { .. } => "decode",
            Self::Handler { .. } => "handler",
        }
    }
}
