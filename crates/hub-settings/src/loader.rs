//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`HubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `HUB_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::HubSettings;

/// Directory holding the settings file and the default database.
pub fn settings_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".analytics-hub")
}

/// Resolve the path to the settings file (`~/.analytics-hub/realtime.json`).
pub fn settings_path() -> PathBuf {
    settings_dir().join("realtime.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<HubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON or an invalid combination of
/// values is an error.
pub fn load_settings_from_path(path: &Path) -> Result<HubSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<HubSettings> {
    let defaults = serde_json::to_value(HubSettings::default())?;

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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut HubSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Override logic with an injectable variable source, so tests need not touch
/// the process environment.
pub fn apply_overrides(settings: &mut HubSettings, var: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| var(name).filter(|v| !v.is_empty());
    let ranged_u64 = |name: &str, min: u64, max: u64| {
        let val = var(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        parsed
    };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("HUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = var("HUB_PORT") {
        match parse_u16_range(&v, 0, 65535) {
            Some(port) => settings.server.port = port,
            None => tracing::warn!(key = "HUB_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
    if let Some(v) = ranged_u64("HUB_OUTBOUND_BUFFER", 1, 65_536) {
        settings.server.outbound_buffer = v as usize;
    }

    // ── Presence / reaper ───────────────────────────────────────────
    if let Some(v) = ranged_u64("HUB_PRESENCE_ONLINE_SECS", 1, 86_400) {
        settings.presence.online_window_secs = v;
    }
    if let Some(v) = ranged_u64("HUB_PRESENCE_AWAY_SECS", 1, 86_400) {
        settings.presence.away_window_secs = v;
    }
    if let Some(v) = ranged_u64("HUB_REAPER_INTERVAL_SECS", 1, 86_400) {
        settings.reaper.interval_secs = v;
    }
    if let Some(v) = ranged_u64("HUB_IDLE_TIMEOUT_SECS", 1, 7 * 86_400) {
        settings.reaper.idle_timeout_secs = v;
    }

    // ── Auth / store / logging ──────────────────────────────────────
    if let Some(v) = string("HUB_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = string("HUB_REALTIME_CAPABILITY") {
        settings.auth.realtime_capability = v;
    }
    if let Some(v) = string("HUB_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = string("HUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = var("HUB_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => tracing::warn!(key = "HUB_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

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
        let target = serde_json::json!({"server": {"port": 4010, "host": "localhost"}});
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
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = read_layers(Path::new("/nonexistent/realtime.json")).unwrap();
        assert_eq!(settings.server.port, 4010);
        assert_eq!(settings.reaper.idle_timeout_secs, 1800);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.json");
        std::fs::write(
            &path,
            r#"{"presence": {"onlineWindowSecs": 120}, "server": {"port": 9000}}"#,
        )
        .unwrap();

        let settings = read_layers(&path).unwrap();
        assert_eq!(settings.presence.online_window_secs, 120);
        assert_eq!(settings.presence.away_window_secs, 1800);
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(read_layers(&path).unwrap_err(), SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_invalid_combination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("realtime.json");
        std::fs::write(&path, r#"{"presence": {"awayWindowSecs": 10}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path).unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = HubSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("HUB_PORT", "0"),
                ("HUB_IDLE_TIMEOUT_SECS", "600"),
                ("HUB_JWT_SECRET", "s3cret"),
                ("HUB_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.reaper.idle_timeout_secs, 600);
        assert_eq!(settings.auth.jwt_secret, "s3cret");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = HubSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("HUB_PORT", "99999"),
                ("HUB_REAPER_INTERVAL_SECS", "0"),
                ("HUB_LOG_JSON", "maybe"),
                ("HUB_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 4010);
        assert_eq!(settings.reaper.interval_secs, 300);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in &["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in &["false", "0", "no", "Off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("30", 1, 60), Some(30));
        assert_eq!(parse_u64_range("61", 1, 60), None);
        assert_eq!(parse_u64_range("abc", 1, 60), None);
    }
}
