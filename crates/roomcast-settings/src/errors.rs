//! Settings error types.
//!
//! Every variant names the settings file so the binary can report which
//! layer broke without extra context.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when loading the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read (permissions, a directory, ...).
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        /// Settings file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON.
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        /// Settings file path.
        path: PathBuf,
        /// Parser error, with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// The file is valid JSON but a field has the wrong type or range,
    /// e.g. `"port": "eighty"`.
    #[error("settings file {} has an invalid value: {source}", path.display())]
    Invalid {
        /// Settings file path.
        path: PathBuf,
        /// Deserializer error naming the field.
        #[source]
        source: serde_json::Error,
    },
}

impl SettingsError {
    /// The settings file the error refers to.
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Read { path, .. } | Self::Parse { path, .. } | Self::Invalid { path, .. } => path,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
