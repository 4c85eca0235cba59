//! Settings loading with deep merge, validation, and environment overrides.
//!
//! Loading flow:
//! 1. Reject empty input and input missing `server.host` / `server.port`
//! 2. Deep-merge the raw values over compiled [`Settings::default()`]
//! 3. Apply environment variable overrides ([`load_from_path`] only)
//! 4. Validate the merged result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::net::{IpAddr, Ipv6Addr};
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{ConfigurationError, Result};
use crate::types::{Settings, SockType};

/// Upper bound for settings backed by a semaphore or bounded channel
/// (`task_worker_num`, `max_connection`, `send_queue_size`).
///
/// Equal to tokio's `Semaphore::MAX_PERMITS`; larger values panic at startup.
pub const MAX_PERMITS: usize = usize::MAX >> 3;

/// Keys that have no meaningful default and must be supplied.
const REQUIRED_KEYS: [(&str, &str, &str); 2] = [
    ("server", "host", "server.host"),
    ("server", "port", "server.port"),
];

/// Load settings from a raw value without consulting the environment.
pub fn load(raw: Value) -> Result<Settings> {
    let merged = merge_over_defaults(raw)?;
    let settings: Settings = serde_json::from_value(merged)?;
    validate(&settings)?;
    Ok(settings)
}

/// Load settings from a JSON or TOML file, then apply `DUPLEX_*` overrides.
pub fn load_from_path(path: &Path) -> Result<Settings> {
    debug!(?path, "loading settings from file");
    let content = std::fs::read_to_string(path)?;
    let raw = parse_content(&content, path)?;
    let merged = merge_over_defaults(raw)?;
    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Parse file content according to the path's extension.
pub fn parse_content(content: &str, path: &Path) -> Result<Value> {
    if content.trim().is_empty() {
        return Err(ConfigurationError::Empty);
    }
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(serde_json::from_str(content)?),
        Some("toml") => Ok(toml::from_str(content)?),
        other => Err(ConfigurationError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

fn merge_over_defaults(raw: Value) -> Result<Value> {
    match &raw {
        Value::Null => return Err(ConfigurationError::Empty),
        Value::Object(map) if map.is_empty() => return Err(ConfigurationError::Empty),
        Value::Object(_) => {}
        _ => {
            return Err(ConfigurationError::InvalidValue(
                "settings must be an object".to_string(),
            ));
        }
    }
    for (section, key, dotted) in REQUIRED_KEYS {
        let present = raw
            .get(section)
            .and_then(|s| s.get(key))
            .is_some_and(|v| !v.is_null());
        if !present {
            return Err(ConfigurationError::MissingKey(dotted));
        }
    }
    let defaults = serde_json::to_value(Settings::default())?;
    Ok(deep_merge(defaults, raw))
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Check cross-field constraints that serde cannot express.
pub fn validate(settings: &Settings) -> Result<()> {
    let server = &settings.server;
    if server.host.trim().is_empty() {
        return Err(ConfigurationError::InvalidValue(
            "server.host must not be empty".to_string(),
        ));
    }
    let literal = server.host.trim_start_matches('[').trim_end_matches(']');
    match server.sock_type {
        SockType::Tcp => {
            if literal.parse::<Ipv6Addr>().is_ok() {
                return Err(ConfigurationError::InvalidValue(format!(
                    "server.host `{}` is IPv6 but sock_type is tcp",
                    server.host
                )));
            }
        }
        SockType::Tcp6 => {
            if !matches!(literal.parse::<IpAddr>(), Ok(IpAddr::V6(_))) {
                return Err(ConfigurationError::InvalidValue(format!(
                    "server.host `{}` must be an IPv6 address for sock_type tcp6",
                    server.host
                )));
            }
        }
    }
    let options = &server.options;
    check_range("server.options.worker_num", options.worker_num, 1, usize::MAX)?;
    check_range("server.options.task_worker_num", options.task_worker_num, 1, MAX_PERMITS)?;
    check_range("server.options.max_connection", options.max_connection, 0, MAX_PERMITS)?;
    check_range("server.options.send_queue_size", options.send_queue_size, 1, MAX_PERMITS)?;
    if options.package_max_length == 0 {
        return Err(ConfigurationError::InvalidValue(
            "server.options.package_max_length must be at least 1".to_string(),
        ));
    }
    if options.request_timeout == 0 {
        return Err(ConfigurationError::InvalidValue(
            "server.options.request_timeout must be at least 1".to_string(),
        ));
    }
    if settings.app.cache
        && (settings.cache.compilation.as_os_str().is_empty()
            || settings.cache.proxies.as_os_str().is_empty())
    {
        return Err(ConfigurationError::InvalidValue(
            "app.cache requires cache.compilation and cache.proxies".to_string(),
        ));
    }
    Ok(())
}

fn check_range(key: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigurationError::InvalidValue(format!(
            "{key} must be between {min} and {max}, got {value}"
        )))
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning (fall back to file/default).
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = read_env_string("DUPLEX_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("DUPLEX_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_usize("DUPLEX_WORKERS", 1, 1024) {
        settings.server.options.worker_num = v;
    }
    if let Some(v) = read_env_bool("DUPLEX_DEBUG") {
        settings.app.debug = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerMode;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn minimal() -> Value {
        json!({"server": {"host": "0.0.0.0", "port": 9502}})
    }

    #[test]
    fn minimal_settings_load() {
        let settings = load(minimal()).unwrap();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9502);
        assert_eq!(settings.server.mode, ServerMode::Process);
        assert!(!settings.app.debug);
    }

    #[test]
    fn null_is_empty() {
        assert_matches!(load(Value::Null), Err(ConfigurationError::Empty));
    }

    #[test]
    fn empty_object_is_empty() {
        assert_matches!(load(json!({})), Err(ConfigurationError::Empty));
    }

    #[test]
    fn non_object_rejected() {
        assert_matches!(load(json!([1, 2])), Err(ConfigurationError::InvalidValue(_)));
    }

    #[test]
    fn missing_host() {
        let raw = json!({"server": {"port": 9502}});
        assert_matches!(load(raw), Err(ConfigurationError::MissingKey("server.host")));
    }

    #[test]
    fn missing_port() {
        let raw = json!({"server": {"host": "0.0.0.0"}});
        assert_matches!(load(raw), Err(ConfigurationError::MissingKey("server.port")));
    }

    #[test]
    fn null_port_counts_as_missing() {
        let raw = json!({"server": {"host": "0.0.0.0", "port": null}});
        assert_matches!(load(raw), Err(ConfigurationError::MissingKey("server.port")));
    }

    #[test]
    fn app_section_without_server_is_missing_host() {
        let raw = json!({"app": {"debug": true}});
        assert_matches!(load(raw), Err(ConfigurationError::MissingKey("server.host")));
    }

    #[test]
    fn nested_options_merge_over_defaults() {
        let raw = json!({
            "server": {"host": "0.0.0.0", "port": 9502, "options": {"worker_num": 3}},
            "app": {"debug": true}
        });
        let settings = load(raw).unwrap();
        assert_eq!(settings.server.options.worker_num, 3);
        assert_eq!(settings.server.options.task_worker_num, 4);
        assert!(settings.app.debug);
        assert_eq!(settings.app.name, "duplex");
    }

    #[test]
    fn invalid_mode_is_json_error() {
        let raw = json!({"server": {"host": "0.0.0.0", "port": 1, "mode": "threads"}});
        assert_matches!(load(raw), Err(ConfigurationError::Json(_)));
    }

    #[test]
    fn ipv6_host_requires_tcp6() {
        let raw = json!({"server": {"host": "::", "port": 1}});
        assert_matches!(load(raw), Err(ConfigurationError::InvalidValue(_)));

        let raw = json!({"server": {"host": "::", "port": 1, "sock_type": "tcp6"}});
        assert!(load(raw).is_ok());
    }

    #[test]
    fn tcp6_rejects_v4_host() {
        let raw = json!({"server": {"host": "127.0.0.1", "port": 1, "sock_type": "tcp6"}});
        assert_matches!(load(raw), Err(ConfigurationError::InvalidValue(_)));
    }

    #[test]
    fn hostname_allowed_for_tcp() {
        let raw = json!({"server": {"host": "localhost", "port": 1}});
        assert!(load(raw).is_ok());
    }

    #[test]
    fn cache_requires_paths() {
        let raw = json!({"server": {"host": "0.0.0.0", "port": 1}, "app": {"cache": true}});
        assert_matches!(load(raw), Err(ConfigurationError::InvalidValue(_)));

        let raw = json!({
            "server": {"host": "0.0.0.0", "port": 1},
            "app": {"cache": true},
            "cache": {"compilation": "/tmp/c", "proxies": "/tmp/p"}
        });
        assert!(load(raw).is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let raw = json!({"server": {"host": "0.0.0.0", "port": 1, "options": {"worker_num": 0}}});
        assert_matches!(load(raw), Err(ConfigurationError::InvalidValue(_)));
    }

    fn with_option(key: &str, value: Value) -> Value {
        json!({"server": {"host": "0.0.0.0", "port": 1, "options": {key: value}}})
    }

    #[test]
    fn permit_backed_options_are_capped() {
        for key in ["task_worker_num", "max_connection", "send_queue_size"] {
            assert_matches!(
                load(with_option(key, json!(u64::MAX))),
                Err(ConfigurationError::InvalidValue(msg)) if msg.contains(key),
                "{key} = u64::MAX"
            );
            assert_matches!(
                load(with_option(key, json!(MAX_PERMITS + 1))),
                Err(ConfigurationError::InvalidValue(_)),
                "{key} = MAX_PERMITS + 1"
            );
            assert!(load(with_option(key, json!(MAX_PERMITS))).is_ok(), "{key} = MAX_PERMITS");
        }
    }

    #[test]
    fn zero_sized_pools_rejected() {
        for key in ["task_worker_num", "send_queue_size"] {
            assert_matches!(
                load(with_option(key, json!(0))),
                Err(ConfigurationError::InvalidValue(_)),
                "{key} = 0"
            );
        }
        assert!(load(with_option("max_connection", json!(0))).is_ok());
    }

    #[test]
    fn zero_request_timeout_rejected() {
        assert_matches!(
            load(with_option("request_timeout", json!(0))),
            Err(ConfigurationError::InvalidValue(msg)) if msg.contains("request_timeout")
        );
        assert!(load(with_option("request_timeout", json!(1))).is_ok());
    }

    #[test]
    fn oversized_max_connection_in_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"host":"0.0.0.0","port":9502,
                "options":{"max_connection":18446744073709551615}}}"#,
        )
        .unwrap();
        assert_matches!(load_from_path(&path), Err(ConfigurationError::InvalidValue(_)));
    }

    #[test]
    fn load_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server":{"host":"0.0.0.0","port":9502}}"#).unwrap();
        let settings = load_from_path(&path).unwrap();
        assert!(!settings.server.host.is_empty());
    }

    #[test]
    fn load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "[server]\nhost = \"0.0.0.0\"\nport = 9502\nmode = \"base\"\n\n[app]\ndebug = true\n",
        )
        .unwrap();
        let settings = load_from_path(&path).unwrap();
        assert_eq!(settings.server.mode, ServerMode::Base);
    }

    #[test]
    fn empty_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "  \n").unwrap();
        assert_matches!(load_from_path(&path), Err(ConfigurationError::Empty));
    }

    #[test]
    fn missing_file_is_io_error() {
        let path = Path::new("/nonexistent/duplex/settings.json");
        assert_matches!(load_from_path(path), Err(ConfigurationError::Io(_)));
    }

    #[test]
    fn unknown_extension_rejected() {
        assert_matches!(
            parse_content("a: b", Path::new("settings.yaml")),
            Err(ConfigurationError::UnsupportedFormat(ext)) if ext == "yaml"
        );
    }

    #[test]
    fn deep_merge_skips_null_and_replaces_arrays() {
        let merged = deep_merge(
            json!({"a": {"b": 1, "c": [1, 2]}, "d": 4}),
            json!({"a": {"c": [3], "e": 5}, "d": null}),
        );
        assert_eq!(merged, json!({"a": {"b": 1, "c": [3], "e": 5}, "d": 4}));
    }

    #[test]
    fn parse_bool_values() {
        for v in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(v), Some(true));
        }
        for v in ["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(v), Some(false));
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9502", 1, 65535), Some(9502));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_usize_range("8", 1, 1024), Some(8));
        assert_eq!(parse_usize_range("-1", 1, 1024), None);
    }
}
