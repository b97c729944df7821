//! Runtime configuration for the sync engine and clock drivers.
//!
//! Loaded from a JSON file, overridable through `SPILLETID_CONFIG_PATH`,
//! falling back to built-in defaults when the file is missing or
//! unparseable.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the JSON configuration is looked up.
const DEFAULT_CONFIG_PATH: &str = "config/spilletid.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "SPILLETID_CONFIG_PATH";

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Base URL of the server reconciliation endpoint.
    pub server_url: String,
    /// Interval between scheduled background push cycles.
    pub push_interval: Duration,
    /// First retry delay; doubles on every failed attempt.
    pub backoff_base: Duration,
    /// Total attempts (first try included) before a push cycle goes dormant.
    pub max_push_attempts: u32,
    /// Timeout applied to every network request so a stuck cycle cannot
    /// hold the push guard forever.
    pub request_timeout: Duration,
    /// Oplog row count above which acknowledged events are compacted away.
    pub compaction_threshold: u64,
    /// Interval between periodic clock checkpoints while running or paused.
    pub checkpoint_interval: Duration,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080/api".into(),
            push_interval: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            max_push_attempts: 5,
            request_timeout: Duration::from_secs(10),
            compaction_threshold: 1_000,
            checkpoint_interval: Duration::from_secs(10),
        }
    }
}

/// JSON representation of the configuration file; every field is optional
/// and falls back to the built-in default.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    server_url: Option<String>,
    push_interval_secs: Option<u64>,
    backoff_base_ms: Option<u64>,
    max_push_attempts: Option<u32>,
    request_timeout_secs: Option<u64>,
    compaction_threshold: Option<u64>,
    checkpoint_interval_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            server_url: raw.server_url.unwrap_or(defaults.server_url),
            push_interval: raw
                .push_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.push_interval),
            backoff_base: raw
                .backoff_base_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            max_push_attempts: raw.max_push_attempts.unwrap_or(defaults.max_push_attempts),
            request_timeout: raw
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            compaction_threshold: raw
                .compaction_threshold
                .unwrap_or(defaults.compaction_threshold),
            checkpoint_interval: raw
                .checkpoint_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.checkpoint_interval),
        }
    }
}

/// Resolve the configuration path taking the environment override into
/// account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"serverUrl": "http://example.test/api", "maxPushAttempts": 2}"#)
                .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.server_url, "http://example.test/api");
        assert_eq!(config.max_push_attempts, 2);
        assert_eq!(config.push_interval, Duration::from_secs(30));
        assert_eq!(config.compaction_threshold, 1_000);
    }
}
