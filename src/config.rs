//! Configuration loading
//!
//! Settings come from an optional `config/config.toml` and from environment
//! variables prefixed with `BERTH` (nested keys separated by `__`, e.g.
//! `BERTH_DATABASE__URL`). See [`OrmConfig::load`].

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use crate::pool::config::DatabaseConfig;

const CONFIG_FILE: &str = "config/config.toml";
const ENV_PREFIX: &str = "BERTH";

/// `[transactions]` section
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionSettings {
    /// Relation cache misses in one transaction above which ORM-2000 is logged
    #[serde(default = "default_relation_cache_miss_warning")]
    pub relation_cache_miss_warning: usize,
    #[serde(default = "default_warn_on_cache_misses")]
    pub warn_on_cache_misses: bool,
}

fn default_relation_cache_miss_warning() -> usize {
    100
}

fn default_warn_on_cache_misses() -> bool {
    true
}

impl Default for TransactionSettings {
    fn default() -> Self {
        Self {
            relation_cache_miss_warning: default_relation_cache_miss_warning(),
            warn_on_cache_misses: default_warn_on_cache_misses(),
        }
    }
}

/// Full crate configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrmConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub transactions: TransactionSettings,
}

impl OrmConfig {
    /// Load from `config/config.toml`, falling back to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

        let settings = match builder.build() {
            Ok(cfg) => cfg,
            Err(err) => {
                // An existing but unreadable file is not fatal; env vars alone may be enough
                if std::path::Path::new(CONFIG_FILE).exists() {
                    log::warn!("failed to load {CONFIG_FILE}, falling back to env: {err}");
                }
                Config::builder()
                    .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
                    .build()
                    .map_err(|env_err| {
                        ConfigError::Message(format!(
                            "Failed to load configuration from file and env: {err}, then env-only error: {env_err}"
                        ))
                    })?
            }
        };

        settings.try_deserialize::<OrmConfig>().map_err(|e| {
            ConfigError::Message(format!(
                "Configuration could not be loaded from file or environment: {e}"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_settings_defaults() {
        let settings = TransactionSettings::default();
        assert_eq!(settings.relation_cache_miss_warning, 100);
        assert!(settings.warn_on_cache_misses);
    }

    #[test]
    fn test_sections_default_independently() {
        let config: OrmConfig =
            serde_json::from_str(r#"{"transactions": {"relation_cache_miss_warning": 5}}"#)
                .expect("valid config");
        assert_eq!(config.transactions.relation_cache_miss_warning, 5);
        assert!(config.transactions.warn_on_cache_misses);
        assert_eq!(config.database.max_connections, 10);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        // No config/config.toml exists in the crate root during tests
        let config = OrmConfig::load().expect("env-only load succeeds");
        assert!(config.database.max_connections > 0);
    }
}
