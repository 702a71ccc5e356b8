//! Process-wide transport settings
//!
//! Loaded once at startup (from the environment or the CLI config file) and
//! injected into the topic provisioner and the producer factory. Nothing below
//! this module reads the environment.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tidewire_core::DEFAULT_RETENTION_MS;

/// Environment variable carrying the platform-wide Kafka topic retention.
pub const RETENTION_ENV: &str = "SP_KAFKA_RETENTION_MS";

/// Errors raised while building [`TransportSettings`].
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Transport settings shared by every producer of the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Platform default retention for provisioned Kafka topics.
    pub kafka_retention_ms: Option<u64>,
    /// Upper bound on waiting for the broker to acknowledge topic creation.
    pub provision_timeout_ms: u64,
    /// Upper bound on opening a broker channel.
    pub connect_timeout_ms: u64,
    /// Upper bound on draining queued Kafka records when a producer disconnects.
    pub flush_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kafka_retention_ms: None,
            provision_timeout_ms: 30_000,
            connect_timeout_ms: 30_000,
            flush_timeout_ms: 5_000,
        }
    }
}

impl TransportSettings {
    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(raw) = lookup(RETENTION_ENV) {
            let retention = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| SettingsError::InvalidValue {
                    key: RETENTION_ENV.to_string(),
                    value: raw.clone(),
                })?;
            settings.kafka_retention_ms = Some(retention);
        }
        Ok(settings)
    }

    pub fn with_kafka_retention_ms(mut self, retention_ms: u64) -> Self {
        self.kafka_retention_ms = Some(retention_ms);
        self
    }

    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Effective retention: explicit override, then platform default, then 10 minutes.
    pub fn resolve_retention_ms(&self, explicit: Option<u64>) -> u64 {
        explicit
            .or(self.kafka_retention_ms)
            .unwrap_or(DEFAULT_RETENTION_MS)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_retention() {
        let settings = TransportSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.resolve_retention_ms(None), 600_000);
    }

    #[test]
    fn test_environment_retention() {
        let settings = TransportSettings::from_lookup(|key| {
            (key == RETENTION_ENV).then(|| "30000".to_string())
        })
        .unwrap();
        assert_eq!(settings.resolve_retention_ms(None), 30_000);
    }

    #[test]
    fn test_explicit_retention_wins() {
        let settings = TransportSettings::default().with_kafka_retention_ms(30_000);
        assert_eq!(settings.resolve_retention_ms(Some(5_000)), 5_000);
    }

    #[test]
    fn test_invalid_environment_value() {
        let result = TransportSettings::from_lookup(|_| Some("ten minutes".to_string()));
        assert!(matches!(result, Err(SettingsError::InvalidValue { .. })));
    }

    #[test]
    fn test_timeouts() {
        let settings = TransportSettings::default()
            .with_provision_timeout(Duration::from_millis(250))
            .with_connect_timeout(Duration::from_secs(2))
            .with_flush_timeout(Duration::from_millis(750));
        assert_eq!(settings.provision_timeout(), Duration::from_millis(250));
        assert_eq!(settings.connect_timeout(), Duration::from_secs(2));
        assert_eq!(settings.flush_timeout(), Duration::from_millis(750));
        assert_eq!(TransportSettings::default().flush_timeout(), Duration::from_secs(5));
    }
}
