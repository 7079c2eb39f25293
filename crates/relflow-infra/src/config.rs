//! Global configuration loader for relflow.
//!
//! Reads `config.toml` from the data directory (`~/.relflow/` by default)
//! and deserializes it into [`GlobalConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::Path;

use relflow_types::config::GlobalConfig;

use crate::sqlite::pool::database_url;

const CONFIG_FILE: &str = "config.toml";

/// Load `{data_dir}/config.toml`.
///
/// A missing file yields the defaults. An unreadable or malformed file also
/// yields the defaults, with a warning.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "config file unreadable, using defaults");
            return GlobalConfig::default();
        }
    };

    toml::from_str::<GlobalConfig>(&content).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), error = %err, "config file malformed, using defaults");
        GlobalConfig::default()
    })
}

/// Resolve the database URL.
///
/// Priority:
/// 1. `database_url` from `config.toml`
/// 2. `{data_dir}/relflow.db`
pub fn resolve_database_url(global_config: &GlobalConfig, data_dir: &Path) -> String {
    global_config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url(data_dir))
}
