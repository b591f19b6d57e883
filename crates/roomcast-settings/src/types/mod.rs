//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a partial
//! settings file only needs the fields it changes.

mod logging;
mod server;

pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000, "path": "/ws" },
///   "logging": { "level": "debug", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomcastSettings {
    /// Network and hub settings.
    pub server: ServerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}
