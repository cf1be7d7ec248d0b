//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WebfloSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WEBFLO_*` environment overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::WebfloSettings;

/// Resolve the settings file path.
///
/// `$WEBFLO_HOME/settings.json` when `WEBFLO_HOME` is set, otherwise
/// `~/.webflo/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(home) = read_env_string("WEBFLO_HOME") {
        return PathBuf::from(home).join("settings.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".webflo").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<WebfloSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WebfloSettings> {
    let defaults = serde_json::to_value(WebfloSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: WebfloSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key; arrays and primitives in `source` replace the
/// target; nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `WEBFLO_*` overrides read through `lookup`.
///
/// Out-of-range or unparsable values are ignored with a warning.
pub fn apply_overrides<F>(settings: &mut WebfloSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    if let Some(v) = env.string("WEBFLO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.ranged("WEBFLO_PORT", 0_u16, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("WEBFLO_SESSION_SECRET") {
        settings.session.secret = Some(v);
    }
    if let Some(v) = env.ranged("WEBFLO_SESSION_TTL", 1_u64, 31_536_000) {
        settings.session.ttl_secs = Some(v);
    }
    if let Some(v) = env.ranged("WEBFLO_CLIENT_PORT_IDLE_MS", 100_u64, 3_600_000) {
        settings.messaging.client_port_idle_ms = v;
    }
    if let Some(v) = env.ranged("WEBFLO_REQUEST_PORT_IDLE_MS", 100_u64, 3_600_000) {
        settings.messaging.request_port_idle_ms = v;
    }
    if let Some(v) = env.boolean("WEBFLO_HANDSHAKE") {
        settings.messaging.handshake = v;
    }
    if let Some(v) = env.string("WEBFLO_LOG_LEVEL") {
        settings.logging.level = v;
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

/// Parse a string as a number within an inclusive range.
pub fn parse_ranged<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

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

    fn boolean(&self, name: &str) -> Option<bool> {
        let val = self.string(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn ranged<T>(&self, name: &str, min: T, max: T) -> Option<T>
    where
        T: std::str::FromStr + PartialOrd,
    {
        let val = self.string(name)?;
        let result = parse_ranged(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"messaging": {"a": 1, "b": 2}});
        let source = serde_json::json!({"messaging": {"a": 10}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["messaging"]["a"], 10);
        assert_eq!(merged["messaging"]["b"], 2);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.messaging.request_port_idle_ms, 15_000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"session":{"ttlSecs":3600},"messaging":{"clientPortIdleMs":2500}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.session.ttl_secs, Some(3600));
        assert_eq!(settings.session.cookie_name, "__sessid");
        assert_eq!(settings.messaging.client_port_idle_ms, 2500);
        assert_eq!(settings.messaging.request_port_idle_ms, 15_000);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = WebfloSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("WEBFLO_HOST", "0.0.0.0"),
                ("WEBFLO_PORT", "8080"),
                ("WEBFLO_SESSION_SECRET", "s3cr3t"),
                ("WEBFLO_SESSION_TTL", "600"),
                ("WEBFLO_REQUEST_PORT_IDLE_MS", "20000"),
                ("WEBFLO_HANDSHAKE", "yes"),
                ("WEBFLO_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.session.secret.as_deref(), Some("s3cr3t"));
        assert_eq!(settings.session.ttl_secs, Some(600));
        assert_eq!(settings.messaging.request_port_idle_ms, 20_000);
        assert!(settings.messaging.handshake);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = WebfloSettings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("WEBFLO_PORT", "not-a-port"),
                ("WEBFLO_CLIENT_PORT_IDLE_MS", "5"),
                ("WEBFLO_HANDSHAKE", "maybe"),
                ("WEBFLO_SESSION_SECRET", ""),
            ]),
        );
        assert_eq!(settings.server.port, 3000);
        assert_eq!(settings.messaging.client_port_idle_ms, 10_000);
        assert!(!settings.messaging.handshake);
        assert!(settings.session.secret.is_none());
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }

    #[test]
    fn parse_ranged_bounds() {
        assert_eq!(parse_ranged("5", 1_u64, 10), Some(5));
        assert_eq!(parse_ranged("11", 1_u64, 10), None);
        assert_eq!(parse_ranged("-1", 0_u16, 10), None);
    }
}
