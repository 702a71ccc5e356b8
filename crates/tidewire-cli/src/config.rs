//! Configuration file support for tidewire
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Broker-side settings shared by every producer
//! transport:
//!   kafka_retention_ms: 600000
//!   provision_timeout_ms: 30000
//!   connect_timeout_ms: 30000
//!   flush_timeout_ms: 5000
//!
//! # Time-series store backing the data lake
//! datalake:
//!   url: "http://influxdb:8086"
//!   database: sp
//!   username: admin
//!   password: secret
//!   timeout_ms: 10000
//!
//! # Logging settings
//! logging:
//!   level: info
//!   format: json
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tidewire_runtime::{InfluxConfig, TransportSettings, RETENTION_ENV};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Transport settings injected into producers and the topic provisioner
    pub transport: TransportSettings,

    /// Time-series store connection
    pub datalake: InfluxConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Include timestamps
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            timestamps: true,
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => Self::from_yaml(&content).or_else(|_| Self::from_toml(&content)),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `SP_KAFKA_RETENTION_MS` replaces the configured platform retention.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = TransportSettings::from_lookup(lookup)
            .map_err(|e| ConfigError::InvalidValue(RETENTION_ENV.to_string(), e.to_string()))?;
        if from_env.kafka_retention_ms.is_some() {
            self.transport.kafka_retention_ms = from_env.kafka_retention_ms;
        }
        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            transport: TransportSettings::default().with_kafka_retention_ms(600_000),
            datalake: InfluxConfig::new("http://influxdb:8086", "sp")
                .with_credentials("admin", "change-me"),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
                timestamps: true,
            },
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.kafka_retention_ms, None);
        assert_eq!(config.datalake.url, "http://localhost:8086");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
transport:
  kafka_retention_ms: 30000
datalake:
  url: "http://influxdb:8086"
  username: admin
  password: secret
logging:
  format: json
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.transport.kafka_retention_ms, Some(30_000));
        assert_eq!(config.transport.connect_timeout_ms, 30_000);
        assert_eq!(config.datalake.url, "http://influxdb:8086");
        assert_eq!(config.datalake.database, "sp");
        assert_eq!(config.datalake.password.as_deref(), Some("secret"));
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_toml_parsing() {
        let toml = r#"
[transport]
provision_timeout_ms = 5000

[datalake]
url = "http://tsdb:8086"
database = "metrics"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.transport.provision_timeout_ms, 5_000);
        assert_eq!(config.datalake.database, "metrics");
    }

    #[test]
    fn test_env_overrides_file_retention() {
        let mut config = Config::default();
        config.transport.kafka_retention_ms = Some(1_000);

        config.apply_env(|_| None).unwrap();
        assert_eq!(config.transport.kafka_retention_ms, Some(1_000));

        config
            .apply_env(|key| (key == RETENTION_ENV).then(|| "30000".to_string()))
            .unwrap();
        assert_eq!(config.transport.kafka_retention_ms, Some(30_000));

        assert!(config
            .apply_env(|_| Some("soon".to_string()))
            .is_err());
    }
}
