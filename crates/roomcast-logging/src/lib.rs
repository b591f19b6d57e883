//! # roomcast-logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level so operators can raise verbosity without editing
//! settings.

#![deny(unsafe_code)]

use roomcast_settings::{LogFormat, LoggingSettings};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Logging setup failures.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The configured filter directive does not parse.
    #[error("invalid log filter '{directive}': {message}")]
    InvalidFilter {
        /// Directive as configured.
        directive: String,
        /// Parser message.
        message: String,
    },
    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Install(String),
}

/// Build the filter: `RUST_LOG` if set and valid, otherwise `default_directive`.
pub fn build_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    parse_filter(default_directive)
}

fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|e| LoggingError::InvalidFilter {
        directive: directive.to_string(),
        message: e.to_string(),
    })
}

/// Install the global subscriber according to `settings`.
pub fn init_subscriber(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let filter = build_filter(&settings.level)?;
    let result = match settings.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
    };
    result.map_err(|e| LoggingError::Install(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_directive_parses() {
        assert!(parse_filter("info,roomcast_server=debug").is_ok());
    }

    #[test]
    fn invalid_directive_is_reported() {
        let err = parse_filter("roomcast_server=loud").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter { .. }));
        assert!(err.to_string().contains("roomcast_server=loud"));
    }

    #[test]
    fn second_install_fails_cleanly() {
        let settings = LoggingSettings::default();
        let _ = init_subscriber(&settings);
        let again = init_subscriber(&settings);
        assert!(matches!(again, Err(LoggingError::Install(_))));
    }
}
