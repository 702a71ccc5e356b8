//! Broker-side topic settings for platform-managed Kafka topics

use serde::{Deserialize, Serialize};

/// Retention applied when neither the descriptor nor the platform sets one (10 minutes).
pub const DEFAULT_RETENTION_MS: u64 = 600_000;

/// Topic-level config key carrying the retention.
pub const RETENTION_MS_CONFIG: &str = "retention.ms";

/// Settings for a platform-managed topic.
///
/// Partitions and replication are pinned to 1 (single-broker deployments);
/// retention is the only tunable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
    pub retention_ms: u64,
}

impl TopicConfig {
    pub fn new(name: &str, retention_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            partitions: 1,
            replication_factor: 1,
            retention_ms,
        }
    }

    /// Topic-level configuration entries sent with the create request.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![(RETENTION_MS_CONFIG, self.retention_ms.to_string())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_partitions_and_replication() {
        let topic = TopicConfig::new("sp:stream:42", DEFAULT_RETENTION_MS);
        assert_eq!(topic.partitions, 1);
        assert_eq!(topic.replication_factor, 1);
        assert_eq!(
            topic.entries(),
            vec![("retention.ms", "600000".to_string())]
        );
    }
}
