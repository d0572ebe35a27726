//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{RelaySettings, StoreSettings};

/// Resolve the settings file path.
///
/// `RELAY_SETTINGS_PATH` wins; otherwise `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = std::env::var("RELAY_SETTINGS_PATH").ok().filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = merge_file(path)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply overrides read through `lookup` (normally `std::env::var`).
///
/// Invalid values are logged and ignored, keeping the file/default value.
pub fn apply_overrides<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_STORE_URL") {
        settings.store.url = v;
    }
    let host = env.string("CC_REDIS_HOST");
    let port = env.u16_range("CC_REDIS_PORT", 1, 65535);
    if host.is_some() || port.is_some() {
        let host = host.unwrap_or_else(|| "127.0.0.1".into());
        settings.store.url = StoreSettings::url_for(&host, port.unwrap_or(6379));
    }
    if let Some(v) = env.string("CC_REDIS_PASSWORD") {
        settings.store.password = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Channel ─────────────────────────────────────────────────────
    if let Some(v) = env.u64_range("RELAY_MAX_ATTEMPTS", 1, 1_000) {
        settings.channel.max_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.u64_range("RELAY_RECONNECT_DELAY_MS", 1, 600_000) {
        settings.channel.reconnect_delay_ms = v;
    }
    if let Some(v) = env.bool("RELAY_PERSIST_QUEUE") {
        settings.channel.persist_queue = v;
    }

    // ── Fan-out ─────────────────────────────────────────────────────
    if let Some(v) = env.u64_range("RELAY_ONLINE_TTL_SECS", 1, 86_400) {
        settings.fanout.online_ttl_secs = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Lookup readers ──────────────────────────────────────────────────────────

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16_range(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64_range(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use serde_json::json;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn deep_merge_objects_recursively() {
        let target = json!({"a": {"b": 1, "c": 2}});
        let source = json!({"a": {"c": 3}});
        assert_eq!(deep_merge(target, source), json!({"a": {"b": 1, "c": 3}}));
    }

    #[test]
    fn deep_merge_arrays_are_replaced() {
        let target = json!({"methods": ["a", "b"]});
        let source = json!({"methods": ["c"]});
        assert_eq!(deep_merge(target, source), json!({"methods": ["c"]}));
    }

    #[test]
    fn deep_merge_nulls_are_skipped() {
        let target = json!({"a": 1});
        let source = json!({"a": null});
        assert_eq!(deep_merge(target, source), json!({"a": 1}));
    }

    // ── files ───────────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = merge_file(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.channel.max_attempts, 15);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "channel": {"maxAttempts": 4},
                "services": {"QuxService": {"endpoint": "localhost:50060"}}
            }"#,
        )
        .unwrap();

        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.channel.max_attempts, 4);
        assert_eq!(settings.channel.reconnect_delay_ms, 1_000);
        assert_eq!(settings.services.len(), 5);
        assert_eq!(settings.service("QuxService").unwrap().endpoint, "localhost:50060");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(merge_file(&path).is_err());
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn store_url_override() {
        let mut settings = RelaySettings::default();
        apply_overrides(&mut settings, lookup(&[("RELAY_STORE_URL", "redis://cache:7000")]));
        assert_eq!(settings.store.url, "redis://cache:7000");
    }

    #[test]
    fn redis_host_port_and_password() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("CC_REDIS_HOST", "redis.internal"),
                ("CC_REDIS_PORT", "6380"),
                ("CC_REDIS_PASSWORD", "hunter2"),
            ]),
        );
        assert_eq!(settings.store.url, "redis://redis.internal:6380");
        assert_eq!(settings.store.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn redis_port_alone_keeps_loopback_host() {
        let mut settings = RelaySettings::default();
        apply_overrides(&mut settings, lookup(&[("CC_REDIS_PORT", "6390")]));
        assert_eq!(settings.store.url, "redis://127.0.0.1:6390");
    }

    #[test]
    fn channel_and_fanout_overrides() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("RELAY_MAX_ATTEMPTS", "3"),
                ("RELAY_RECONNECT_DELAY_MS", "250"),
                ("RELAY_PERSIST_QUEUE", "yes"),
                ("RELAY_ONLINE_TTL_SECS", "120"),
                ("RELAY_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.channel.max_attempts, 3);
        assert_eq!(settings.channel.reconnect_delay_ms, 250);
        assert!(settings.channel.persist_queue);
        assert_eq!(settings.fanout.online_ttl_secs, 120);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_values_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("RELAY_MAX_ATTEMPTS", "0"),
                ("RELAY_RECONNECT_DELAY_MS", "soon"),
                ("RELAY_PERSIST_QUEUE", "maybe"),
                ("CC_REDIS_PORT", "99999"),
            ]),
        );
        assert_eq!(settings.channel.max_attempts, 15);
        assert_eq!(settings.channel.reconnect_delay_ms, 1_000);
        assert!(!settings.channel.persist_queue);
        assert_eq!(settings.store.url, "redis://127.0.0.1:6379");
    }

    #[test]
    fn empty_values_are_ignored() {
        let mut settings = RelaySettings::default();
        apply_overrides(&mut settings, lookup(&[("RELAY_STORE_URL", "")]));
        assert_eq!(settings.store.url, "redis://127.0.0.1:6379");
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
