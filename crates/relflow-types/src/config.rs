//! Configuration types for relflow.
//!
//! `GlobalConfig` represents the top-level `config.toml`; `EngineConfig` holds
//! the tunables of the workflow engine (retry budget, watchdog interval).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine tunables applied per workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total attempts a step gets before it waits for a manual retry.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Interval after which a step that has not logged is assumed hung.
    #[serde(default = "default_watchdog_delay_ms")]
    pub watchdog_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_watchdog_delay_ms() -> u64 {
    11 * 60 * 1000
}

impl EngineConfig {
    pub fn watchdog_delay(&self) -> Duration {
        Duration::from_millis(self.watchdog_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            watchdog_delay_ms: default_watchdog_delay_ms(),
        }
    }
}

/// Top-level configuration for the relflow host.
///
/// Loaded from `~/.relflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Engine settings shared by every workflow the host runs.
    #[serde(default)]
    pub engine: EngineConfig,

    /// SQLite URL override; defaults to `{data_dir}/relflow.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.watchdog_delay(), Duration::from_secs(660));
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
database_url = "sqlite:///tmp/relflow.db"

[engine]
max_retries = 5
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.engine.watchdog_delay_ms, 660_000);
        assert_eq!(config.database_url.as_deref(), Some("sqlite:///tmp/relflow.db"));
    }

    #[test]
    fn test_global_config_serde_roundtrip() {
        let config = GlobalConfig {
            engine: EngineConfig {
                max_retries: 1,
                watchdog_delay_ms: 750,
            },
            database_url: None,
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GlobalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
