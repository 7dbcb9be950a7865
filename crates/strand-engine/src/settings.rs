//! Runner settings with file deep-merge and environment overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RunnerSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `STRAND_*` environment overrides (highest priority)

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::middleware::RetryConfig;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn to_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Zero disables the corresponding deadline.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub llm_ms: u64,
    pub tool_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSettings {
    pub max_turns: u32,
    /// Messages of history sent per turn. Zero or negative sends everything.
    pub history_window: i64,
    pub stream_buffer: usize,
    pub retry: RetrySettings,
    pub timeouts: TimeoutSettings,
    pub parallel_tools: bool,
    pub max_tool_concurrency: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_turns: 4,
            history_window: 20,
            stream_buffer: 64,
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
            parallel_tools: false,
            max_tool_concurrency: 8,
        }
    }
}

impl RunnerSettings {
    /// Defaults plus environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults, deep-merged with `path` when it exists, then environment
    /// overrides. Invalid JSON is an error; a missing file is not.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let defaults = serde_json::to_value(Self::default())?;
        let merged = if path.exists() {
            debug!(?path, "loading runner settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        } else {
            debug!(?path, "settings file not found, using defaults");
            defaults
        };
        let mut settings: Self = serde_json::from_value(merged)?;
        apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_turns == 0 {
            return Err(SettingsError::Invalid {
                key: "max_turns",
                reason: "must be at least 1".into(),
            });
        }
        if self.stream_buffer == 0 {
            return Err(SettingsError::Invalid {
                key: "stream_buffer",
                reason: "must be at least 1".into(),
            });
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(SettingsError::Invalid {
                key: "retry.multiplier",
                reason: format!("must be >= 1, got {}", self.retry.multiplier),
            });
        }
        Ok(())
    }
}

/// Objects merge per key, everything else is replaced. Nulls in `source`
/// keep the target value.
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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `STRAND_*` overrides read through `lookup`. Unparseable values are
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut RunnerSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = parse_with(&read, "STRAND_MAX_TURNS", |s| s.parse::<u32>().ok().filter(|n| *n > 0)) {
        settings.max_turns = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_HISTORY_WINDOW", |s| s.parse::<i64>().ok()) {
        settings.history_window = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_STREAM_BUFFER", |s| s.parse::<usize>().ok().filter(|n| *n > 0)) {
        settings.stream_buffer = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_RETRY_MAX_ATTEMPTS", |s| s.parse::<u32>().ok()) {
        settings.retry.max_attempts = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_RETRY_BASE_DELAY_MS", |s| s.parse::<u64>().ok()) {
        settings.retry.base_delay_ms = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_RETRY_MAX_DELAY_MS", |s| s.parse::<u64>().ok()) {
        settings.retry.max_delay_ms = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_LLM_TIMEOUT_MS", |s| s.parse::<u64>().ok()) {
        settings.timeouts.llm_ms = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_TOOL_TIMEOUT_MS", |s| s.parse::<u64>().ok()) {
        settings.timeouts.tool_ms = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_PARALLEL_TOOLS", parse_bool) {
        settings.parallel_tools = v;
    }
    if let Some(v) = parse_with(&read, "STRAND_MAX_TOOL_CONCURRENCY", |s| {
        s.parse::<usize>().ok().filter(|n| *n > 0)
    }) {
        settings.max_tool_concurrency = v;
    }
}

fn parse_with<T>(
    read: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = read(key)?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key, value = %raw, "invalid env override, ignoring");
    }
    parsed
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let s = RunnerSettings::default();
        assert_eq!(s.max_turns, 4);
        assert_eq!(s.history_window, 20);
        assert_eq!(s.stream_buffer, 64);
        assert_eq!(s.retry.max_attempts, 2);
        assert_eq!(s.retry.to_config().base_delay, Duration::from_millis(200));
        assert_eq!(s.timeouts, TimeoutSettings::default());
        assert!(!s.parallel_tools);
        s.validate().unwrap();
    }

    #[test]
    fn deep_merge_nested_and_nulls() {
        let merged = deep_merge(
            json!({"retry": {"max_attempts": 2, "base_delay_ms": 200}, "max_turns": 4}),
            json!({"retry": {"max_attempts": 5}, "max_turns": null}),
        );
        assert_eq!(merged, json!({"retry": {"max_attempts": 5, "base_delay_ms": 200}, "max_turns": 4}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        assert_eq!(deep_merge(json!({"a": [1, 2]}), json!({"a": [3]})), json!({"a": [3]}));
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_turns": 9, "timeouts": {{"llm_ms": 1500}}}}"#).unwrap();
        let s = RunnerSettings::load_from_path(file.path()).unwrap();
        assert_eq!(s.max_turns, 9);
        assert_eq!(s.timeouts.llm_ms, 1500);
        assert_eq!(s.timeouts.tool_ms, 0);
        assert_eq!(s.history_window, 20);
    }

    #[test]
    fn missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = RunnerSettings::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(s.max_turns, RunnerSettings::default().max_turns);
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = RunnerSettings::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn zero_max_turns_in_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_turns": 0}}"#).unwrap();
        let err = RunnerSettings::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "max_turns", .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut s = RunnerSettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                ("STRAND_MAX_TURNS", "12"),
                ("STRAND_HISTORY_WINDOW", "-1"),
                ("STRAND_PARALLEL_TOOLS", "yes"),
                ("STRAND_RETRY_MAX_ATTEMPTS", "3"),
                ("STRAND_TOOL_TIMEOUT_MS", "250"),
            ]),
        );
        assert_eq!(s.max_turns, 12);
        assert_eq!(s.history_window, -1);
        assert!(s.parallel_tools);
        assert_eq!(s.retry.max_attempts, 3);
        assert_eq!(s.timeouts.tool_ms, 250);
    }

    #[test]
    fn invalid_env_values_ignored() {
        let mut s = RunnerSettings::default();
        apply_env_overrides(
            &mut s,
            env(&[
                ("STRAND_MAX_TURNS", "0"),
                ("STRAND_STREAM_BUFFER", "lots"),
                ("STRAND_PARALLEL_TOOLS", "maybe"),
                ("STRAND_LLM_TIMEOUT_MS", ""),
            ]),
        );
        assert_eq!(s, RunnerSettings::default());
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("nah"), None);
    }
}
