//! # roomcast-core
//!
//! Foundation types shared by every roomcast crate:
//!
//! - [`message::EventMessage`]: the `{event, data}` wire record
//! - [`ids::SessionId`]: opaque per-connection identifier
//! - [`errors`]: hub and dispatch error taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;

pub use errors::{BoxError, DispatchError, HubError};
pub use ids::SessionId;
pub use message::{CONNECT_EVENT, DISCONNECT_EVENT, EventMessage, is_reserved_event};
