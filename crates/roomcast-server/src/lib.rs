//! # roomcast-server
//!
//! Room-aware WebSocket event hub on top of Axum.
//!
//! - [`server::Server`]: composition root, registration API, Axum attachment
//! - [`hub`]: the coordinating loop, client registry and room index
//! - [`events`]: middleware chain and typed/untyped dispatch table
//! - [`websocket`]: per-session handle and the inbound/outbound loops
//! - Graceful shutdown via [`shutdown::ShutdownCoordinator`]

#![deny(unsafe_code)]

pub mod config;
pub mod events;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use events::HandlerResult;
pub use hub::Hub;
pub use roomcast_core::{EventMessage, SessionId};
pub use server::Server;
pub use websocket::session::{SendStatus, Session};
