//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If `~/.vigil/settings.json` exists, deep-merge its values over defaults
//! 3. Apply `VIGIL_*` environment overrides (highest priority)
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use vigil_core::ReRegistration;

use crate::errors::Result;
use crate::types::VigilSettings;

/// Resolve the settings file path. `VIGIL_HOME` replaces `~/.vigil`.
pub fn settings_path() -> PathBuf {
    if let Ok(dir) = std::env::var("VIGIL_HOME") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("settings.json");
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load settings from `path`, reading overrides through `env`.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<VigilSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key with `source` winning; arrays and primitives are
/// replaced; `null` in `source` keeps the target value.
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

/// Apply `VIGIL_*` overrides. Unparseable values are ignored with a warning.
pub fn apply_env_overrides<F>(settings: &mut VigilSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| env(name).filter(|v| !v.is_empty());

    if let Some(v) = read("VIGIL_URL") {
        settings.server.url = v;
    }
    if let Some(v) = read_u64(&read, "VIGIL_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.server.connect_timeout_ms = v;
    }
    if let Some(v) = read_u64(&read, "VIGIL_COMMAND_TIMEOUT_MS", 100, 600_000) {
        settings.server.command_timeout_ms = v;
    }
    if let Some(v) = read_u64(&read, "VIGIL_HEARTBEAT_INTERVAL_MS", 0, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_u64(&read, "VIGIL_RECONNECT_MAX_DELAY_MS", 100, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
    if let Some(v) = read_bool(&read, "VIGIL_BUFFER_DURING_SNAPSHOT") {
        settings.mirror.buffer_during_snapshot = v;
    }
    if let Some(v) = read("VIGIL_REREGISTRATION") {
        match parse_reregistration(&v) {
            Some(policy) => settings.mirror.reregistration = policy,
            None => tracing::warn!(key = "VIGIL_REREGISTRATION", value = %v, "invalid policy, ignoring"),
        }
    }
    if let Some(v) = read("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_bool(&read, "VIGIL_LOG_JSON") {
        settings.logging.json = v;
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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a re-registration policy name (`merge`, `mergeRecordings`, `replace`).
pub fn parse_reregistration(val: &str) -> Option<ReRegistration> {
    match val.to_lowercase().as_str() {
        "merge" | "mergerecordings" | "merge_recordings" => Some(ReRegistration::MergeRecordings),
        "replace" => Some(ReRegistration::Replace),
        _ => None,
    }
}

fn read_bool(read: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let val = read(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_u64(read: &impl Fn(&str) -> Option<String>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = read(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"url": "ws://a", "commandTimeoutMs": 5}});
        let source = serde_json::json!({"server": {"url": "ws://b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["url"], "ws://b");
        assert_eq!(merged["server"]["commandTimeoutMs"], 5);
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_with_env ───────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_with_env(Path::new("/nonexistent/settings.json"), no_env).unwrap();
        assert_eq!(settings, VigilSettings::default());
    }

    #[test]
    fn partial_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"url": "wss://nvr.local/websocket"}, "mirror": {"reregistration": "replace"}}"#,
        )
        .unwrap();

        let settings = load_with_env(&path, no_env).unwrap();
        assert_eq!(settings.server.url, "wss://nvr.local/websocket");
        assert_eq!(settings.server.command_timeout_ms, 30_000);
        assert_eq!(settings.mirror.reregistration, ReRegistration::Replace);
        assert!(settings.mirror.buffer_during_snapshot);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::Json(_)));
    }

    #[test]
    fn file_failing_validation_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"url": "http://nvr.local"}}"#).unwrap();
        assert_matches!(load_with_env(&path, no_env), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn env_beats_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"url": "ws://file/websocket"}}"#).unwrap();

        let env = env_from(&[
            ("VIGIL_URL", "ws://env/websocket"),
            ("VIGIL_BUFFER_DURING_SNAPSHOT", "off"),
            ("VIGIL_REREGISTRATION", "replace"),
            ("VIGIL_LOG_JSON", "yes"),
        ]);
        let settings = load_with_env(&path, env).unwrap();
        assert_eq!(settings.server.url, "ws://env/websocket");
        assert!(!settings.mirror.buffer_during_snapshot);
        assert_eq!(settings.mirror.reregistration, ReRegistration::Replace);
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = VigilSettings::default();
        apply_env_overrides(
            &mut settings,
            env_from(&[
                ("VIGIL_COMMAND_TIMEOUT_MS", "soon"),
                ("VIGIL_BUFFER_DURING_SNAPSHOT", "maybe"),
                ("VIGIL_REREGISTRATION", "sometimes"),
                ("VIGIL_URL", ""),
            ]),
        );
        assert_eq!(settings, VigilSettings::default());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("100", 100, 200), Some(100));
        assert_eq!(parse_u64_range("200", 100, 200), Some(200));
        assert_eq!(parse_u64_range("99", 100, 200), None);
        assert_eq!(parse_u64_range("-1", 0, 200), None);
    }

    #[test]
    fn parse_reregistration_aliases() {
        assert_eq!(parse_reregistration("merge"), Some(ReRegistration::MergeRecordings));
        assert_eq!(
            parse_reregistration("mergeRecordings"),
            Some(ReRegistration::MergeRecordings)
        );
        assert_eq!(parse_reregistration("Replace"), Some(ReRegistration::Replace));
        assert_eq!(parse_reregistration("drop"), None);
    }
}
