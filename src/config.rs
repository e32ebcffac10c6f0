//! Configuration management for Tollgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TollgateError};
use crate::ratelimit::StoreKind;

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Admission limits
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Idle key eviction
    #[serde(default)]
    pub eviction: EvictionConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Admissions allowed per key per window
    #[serde(default = "default_max_count")]
    pub max_count: u64,

    /// Window length, which is also the lockout length, in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// State store implementation
    #[serde(default)]
    pub store: StoreKind,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            interval_ms: default_interval_ms(),
            store: StoreKind::default(),
        }
    }
}

impl LimiterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_max_count() -> u64 {
    2
}

fn default_interval_ms() -> u64 {
    5000
}

/// Idle key eviction configuration.
///
/// Disabled by default: every key seen stays in memory for the life of the
/// process unless a sweeper is turned on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Whether to run the background sweeper
    #[serde(default)]
    pub enabled: bool,

    /// How long a key may sit idle before it is evicted, in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// How often the sweeper runs, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_secs: default_retention_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl EvictionConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_retention_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level filter; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TollgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from defaults, an optional YAML file, and
    /// `TOLLGATE__SECTION__FIELD` environment variables, in that order of
    /// precedence (last wins).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        let config: TollgateConfig = builder
            .add_source(
                config::Environment::with_prefix("TOLLGATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Check the configuration for values the limiter cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limiter.max_count == 0 {
            return Err(TollgateError::Config(
                "limiter.max_count must be greater than zero".to_string(),
            ));
        }
        if self.limiter.interval_ms == 0 {
            return Err(TollgateError::Config(
                "limiter.interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.eviction.enabled {
            if self.eviction.sweep_interval_secs == 0 {
                return Err(TollgateError::Config(
                    "eviction.sweep_interval_secs must be greater than zero".to_string(),
                ));
            }
            if self.eviction.retention() < self.limiter.interval() {
                return Err(TollgateError::Config(
                    "eviction.retention_secs must cover at least one limiter interval".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TollgateConfig::default();

        assert_eq!(config.limiter.max_count, 2);
        assert_eq!(config.limiter.interval(), Duration::from_secs(5));
        assert_eq!(config.limiter.store, StoreKind::Single);
        assert!(!config.eviction.enabled);
        assert_eq!(config.logging.format, LogFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
limiter:
  max_count: 100
  store: sharded
logging:
  format: json
"#;
        let config = TollgateConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.limiter.max_count, 100);
        assert_eq!(config.limiter.interval_ms, 5000);
        assert_eq!(config.limiter.store, StoreKind::Sharded);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = TollgateConfig::from_yaml("limiter: [1, 2");
        assert!(matches!(result, Err(TollgateError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = TollgateConfig::default();
        config.limiter.max_count = 0;
        assert!(config.validate().is_err());

        let mut config = TollgateConfig::default();
        config.limiter.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_eviction_bounds() {
        let mut config = TollgateConfig::default();
        config.limiter.interval_ms = 10_000;
        config.eviction.retention_secs = 5;

        // Only checked once the sweeper is enabled.
        assert!(config.validate().is_ok());

        config.eviction.enabled = true;
        assert!(config.validate().is_err());

        config.eviction.retention_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "tollgate-config-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "limiter:\n  max_count: 7\n  interval_ms: 1000\neviction:\n  enabled: true\n",
        )
        .unwrap();

        let config = TollgateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.limiter.max_count, 7);
        assert_eq!(config.limiter.interval_ms, 1000);
        assert!(config.eviction.enabled);
        assert_eq!(config.eviction.retention_secs, 300);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = TollgateConfig::load(None).unwrap();
        assert_eq!(config.limiter.max_count, default_max_count());
    }
}
