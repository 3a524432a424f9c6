//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PerchSettings::default()`]
//! 2. If `~/.perch/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PERCH_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{perch_home, OverflowPolicy, PerchSettings};

/// Resolve the path to the settings file (`~/.perch/settings.json`).
pub fn settings_path() -> PathBuf {
    perch_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PerchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid merged value
/// is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PerchSettings> {
    let mut settings = read_merged(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_merged(path: &Path) -> Result<PerchSettings> {
    let defaults = serde_json::to_value(PerchSettings::default())?;

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

/// Apply `PERCH_*` environment variable overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut PerchSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`, so tests need not touch the
/// process environment.
pub fn apply_overrides<F>(settings: &mut PerchSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCH_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PERCH_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("PERCH_WS_PATH") {
        settings.server.ws_path = v;
    }

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = env.parsed("PERCH_MAX_WORKERS", |s| parse_usize_range(s, 1, 10_000)) {
        settings.broker.max_workers = v;
    }
    if let Some(v) = env.parsed("PERCH_INTAKE_CAPACITY", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.broker.intake_capacity = v;
    }
    if let Some(v) = env.parsed("PERCH_REQUEST_TIMEOUT_MS", |s| {
        parse_u64_range(s, 1, 3_600_000)
    }) {
        settings.broker.request_timeout_ms = v;
    }
    if let Some(v) = env.parsed("PERCH_OVERFLOW", OverflowPolicy::parse) {
        settings.broker.overflow = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCH_DB_PATH") {
        settings.store.path = PathBuf::from(v);
    }
    if let Some(v) = env.parsed("PERCH_DB_MAX_CONNECTIONS", |s| {
        parse_u32_range(s, 1, 10_000)
    }) {
        settings.store.max_connections = v;
    }

    // ── Poster ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCH_CREDENTIALS") {
        settings.poster.credentials_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env.string("PERCH_POST_ENDPOINT") {
        settings.poster.endpoint = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("PERCH_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("PERCH_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
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

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use serde_json::json;

    use super::*;
    use crate::errors::SettingsError;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_nested_objects() {
        let target = json!({"server": {"host": "a", "port": 1}, "x": 1});
        let source = json!({"server": {"port": 2}});
        assert_eq!(
            deep_merge(target, source),
            json!({"server": {"host": "a", "port": 2}, "x": 1})
        );
    }

    #[test]
    fn deep_merge_skips_null() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null}));
        assert_eq!(merged, json!({"a": 1}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2, 3]}), json!({"a": [9]}));
        assert_eq!(merged, json!({"a": [9]}));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_merged(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.server.port, 8021);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 9100}}, "broker": {{"overflow": "reject"}}}}"#
        )
        .unwrap();
        let settings = read_merged(file.path()).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.broker.overflow, OverflowPolicy::Reject);
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(read_merged(file.path()), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_merged_value_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"broker": {{"maxWorkers": 0}}}}"#).unwrap();
        assert!(matches!(
            read_merged(file.path()).and_then(|s| s.validate()),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn overrides_apply() {
        let mut settings = PerchSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("PERCH_HOST", "0.0.0.0"),
                ("PERCH_PORT", "9000"),
                ("PERCH_MAX_WORKERS", "8"),
                ("PERCH_OVERFLOW", "reject"),
                ("PERCH_DB_PATH", "/var/lib/perch.db"),
                ("PERCH_CREDENTIALS", "/etc/perch/token"),
                ("PERCH_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.broker.max_workers, 8);
        assert_eq!(settings.broker.overflow, OverflowPolicy::Reject);
        assert_eq!(settings.store.path, PathBuf::from("/var/lib/perch.db"));
        assert_eq!(
            settings.poster.credentials_path,
            Some(PathBuf::from("/etc/perch/token"))
        );
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = PerchSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("PERCH_PORT", "99999"),
                ("PERCH_MAX_WORKERS", "0"),
                ("PERCH_OVERFLOW", "drop"),
                ("PERCH_LOG_JSON", "maybe"),
                ("PERCH_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8021);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.broker.max_workers, 64);
        assert_eq!(settings.broker.overflow, OverflowPolicy::Block);
        assert!(!settings.logging.json);
    }

    #[test]
    fn parse_bool_values() {
        for v in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("80", 1, 65535), Some(80));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u32_range("50", 1, 100), Some(50));
        assert_eq!(parse_u64_range("abc", 0, 10), None);
        assert_eq!(parse_usize_range("11", 1, 10), None);
    }

    #[test]
    fn settings_path_under_perch_home() {
        let path = settings_path();
        assert!(path.ends_with(".perch/settings.json"));
    }
}
