//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, RoomcastSettings};

/// Resolve the path to the settings file (`~/.roomcast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".roomcast").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RoomcastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RoomcastSettings> {
    let mut settings = load_file_layer(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<RoomcastSettings> {
    if !path.exists() {
        debug!(?path, "settings file not found, using defaults");
        return Ok(RoomcastSettings::default());
    }

    debug!(?path, "loading settings from file");
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |source: serde_json::Error| SettingsError::Invalid {
        path: path.to_path_buf(),
        source,
    };
    let defaults = serde_json::to_value(RoomcastSettings::default()).map_err(invalid)?;
    serde_json::from_value(deep_merge(defaults, user)).map_err(invalid)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ROOMCAST_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored (file/default value wins).
pub fn apply_overrides(settings: &mut RoomcastSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("ROOMCAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("ROOMCAST_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.server.port = port,
            Err(_) => warn!(key = "ROOMCAST_PORT", value = %v, "invalid port, ignoring"),
        }
    }
    if let Some(v) = read("ROOMCAST_PATH") {
        if v.starts_with('/') {
            settings.server.path = v;
        } else {
            warn!(key = "ROOMCAST_PATH", value = %v, "path must start with '/', ignoring");
        }
    }
    if let Some(v) = read("ROOMCAST_QUEUE_CAPACITY") {
        match parse_usize_range(&v, 1, 1_000_000) {
            Some(n) => settings.server.queue_capacity = n,
            None => warn!(key = "ROOMCAST_QUEUE_CAPACITY", value = %v, "invalid capacity, ignoring"),
        }
    }
    if let Some(v) = read("ROOMCAST_MAX_MESSAGE_SIZE") {
        match parse_usize_range(&v, 64, 64 * 1024 * 1024) {
            Some(n) => settings.server.max_message_size = n,
            None => warn!(key = "ROOMCAST_MAX_MESSAGE_SIZE", value = %v, "invalid size, ignoring"),
        }
    }
    if let Some(v) = read("ROOMCAST_ALLOW_RESERVED_EVENTS") {
        match parse_bool(&v) {
            Some(b) => settings.server.allow_reserved_events = b,
            None => warn!(key = "ROOMCAST_ALLOW_RESERVED_EVENTS", value = %v, "invalid boolean, ignoring"),
        }
    }
    if let Some(v) = read("ROOMCAST_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("ROOMCAST_LOG_FORMAT") {
        match LogFormat::parse(&v) {
            Some(f) => settings.logging.format = f,
            None => warn!(key = "ROOMCAST_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.server.path, "/socket");
        assert_eq!(settings.server.queue_capacity, 256);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9090, "path": "/ws"}}"#).unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.path, "/ws");
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }

    #[test]
    fn wrong_field_type_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();

        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
        assert!(err.to_string().contains(path.to_str().unwrap()));
    }

    #[test]
    fn directory_path_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_file_layer(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Read { .. }));
        assert_eq!(err.path(), &dir.path().to_path_buf());
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = RoomcastSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("ROOMCAST_HOST", "127.0.0.1"),
                ("ROOMCAST_PORT", "7000"),
                ("ROOMCAST_PATH", "/events"),
                ("ROOMCAST_QUEUE_CAPACITY", "8"),
                ("ROOMCAST_ALLOW_RESERVED_EVENTS", "yes"),
                ("ROOMCAST_LOG_FORMAT", "json"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.path, "/events");
        assert_eq!(settings.server.queue_capacity, 8);
        assert!(settings.server.allow_reserved_events);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = RoomcastSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("ROOMCAST_PORT", "99999"),
                ("ROOMCAST_PATH", "no-slash"),
                ("ROOMCAST_QUEUE_CAPACITY", "0"),
                ("ROOMCAST_ALLOW_RESERVED_EVENTS", "maybe"),
                ("ROOMCAST_LOG_FORMAT", "xml"),
            ]),
        );
        let defaults = RoomcastSettings::default();
        assert_eq!(settings.server.port, defaults.server.port);
        assert_eq!(settings.server.path, defaults.server.path);
        assert_eq!(settings.server.queue_capacity, defaults.server.queue_capacity);
        assert!(!settings.server.allow_reserved_events);
        assert_eq!(settings.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut settings = RoomcastSettings::default();
        apply_overrides(&mut settings, env(&[("ROOMCAST_HOST", "")]));
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_usize_range_bounds() {
        assert_eq!(parse_usize_range("5", 1, 10), Some(5));
        assert_eq!(parse_usize_range("11", 1, 10), None);
        assert_eq!(parse_usize_range("abc", 1, 10), None);
    }
}
