//! Configuration for the schema registry
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (strata.toml)
//! - Environment variables (STRATA_*)
//!
//! ## Example config file (strata.toml):
//! ```toml
//! [log]
//! topic = "_schemas"
//!
//! [coordinator]
//! wait_timeout_ms = 5000
//! max_register_attempts = 3
//!
//! [retry]
//! max_attempts = 5
//! base_backoff_ms = 100
//! multiplier = 2.0
//! max_jitter_ms = 100
//!
//! [compatibility]
//! default_mode = "BACKWARD"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::compat::CompatibilityMode;

/// Main configuration for the schema registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Log transport settings
    #[serde(default)]
    pub log: LogConfig,

    /// Mutation coordinator settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Transient-failure retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Compatibility policy settings
    #[serde(default)]
    pub compatibility: CompatibilityConfig,
}

/// Log transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Topic holding the registry's mutation records
    #[serde(default = "default_topic")]
    pub topic: String,
}

/// Mutation coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Upper bound on one watermark wait
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// How many times a lost registration race is retried before
    /// surfacing a conflict
    #[serde(default = "default_max_register_attempts")]
    pub max_register_attempts: u32,
}

/// Retry policy parameters for transient log-transport errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

/// Compatibility policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityConfig {
    /// Global mode used until a CONFIG_UPDATE record overrides it
    #[serde(default)]
    pub default_mode: CompatibilityMode,
}

fn default_topic() -> String {
    "_schemas".to_string()
}

fn default_wait_timeout_ms() -> u64 {
    5000
}

fn default_max_register_attempts() -> u32 {
    3
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_base_backoff_ms() -> u64 {
    100
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_jitter_ms() -> u64 {
    100
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            max_register_attempts: default_max_register_attempts(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            multiplier: default_multiplier(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl Default for CompatibilityConfig {
    fn default() -> Self {
        Self {
            default_mode: CompatibilityMode::default(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration from strata.toml and STRATA_* environment
    /// variables, falling back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("strata")
    }

    /// Load configuration from a specific file stem
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix("STRATA").separator("__"))
            .build()?;
        config.try_deserialize()
    }

    /// Upper bound on one watermark wait
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator.wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.log.topic, "_schemas");
        assert_eq!(config.coordinator.max_register_attempts, 3);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.compatibility.default_mode, CompatibilityMode::Backward);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        fs::write(
            &path,
            r#"
            [log]
            topic = "registry-log"

            [compatibility]
            default_mode = "FULL_TRANSITIVE"
            "#,
        )
        .unwrap();

        let stem = path.with_extension("");
        let config = RegistryConfig::load_from(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.log.topic, "registry-log");
        assert_eq!(
            config.compatibility.default_mode,
            CompatibilityMode::FullTransitive
        );
        // Unspecified sections keep their defaults.
        assert_eq!(config.coordinator.wait_timeout_ms, 5000);
    }
}
