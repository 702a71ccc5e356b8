//! Kafka topic provisioning
//!
//! Platform-managed topics are created with one partition, replication
//! factor one, and a retention resolved from the descriptor and the process
//! settings. Creating a topic that already exists is a success; its existing
//! configuration is left untouched.

use crate::config::TransportSettings;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tidewire_core::{KafkaTransport, TopicConfig};
use tracing::info;

/// Outcome of a topic creation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicCreation {
    Created,
    AlreadyExisted,
}

/// Errors raised while provisioning a topic.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("Topic creation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Broker rejected topic {topic}: {reason}")]
    Rejected { topic: String, reason: String },

    #[error("Admin client error: {0}")]
    Client(String),
}

/// Administrative access to a Kafka cluster.
#[async_trait]
pub trait TopicAdmin: Send + Sync {
    /// Create `topic` on the cluster `broker` points at.
    ///
    /// Implementations report an existing topic as
    /// [`TopicCreation::AlreadyExisted`], never as an error.
    async fn create_topic(
        &self,
        broker: &KafkaTransport,
        topic: &TopicConfig,
    ) -> Result<TopicCreation, ProvisionError>;
}

/// Ensures the topic behind a Kafka descriptor exists before producing to it.
#[derive(Clone)]
pub struct TopicProvisioner {
    admin: Arc<dyn TopicAdmin>,
    settings: TransportSettings,
}

impl TopicProvisioner {
    pub fn new(admin: Arc<dyn TopicAdmin>, settings: TransportSettings) -> Self {
        Self { admin, settings }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Topic settings derived from the descriptor and the process settings.
    pub fn topic_config(&self, kafka: &KafkaTransport) -> TopicConfig {
        TopicConfig::new(
            &kafka.topic_name,
            self.settings.resolve_retention_ms(kafka.retention_ms),
        )
    }

    /// Create the descriptor's topic if it does not exist yet.
    pub async fn ensure_topic(
        &self,
        kafka: &KafkaTransport,
    ) -> Result<TopicCreation, ProvisionError> {
        let topic = self.topic_config(kafka);
        let timeout = self.settings.provision_timeout();

        let outcome = tokio::time::timeout(timeout, self.admin.create_topic(kafka, &topic))
            .await
            .map_err(|_| ProvisionError::Timeout(timeout))??;

        match outcome {
            TopicCreation::Created => info!(
                "Created topic {} on {} (retention.ms={})",
                topic.name,
                kafka.broker_address(),
                topic.retention_ms
            ),
            TopicCreation::AlreadyExisted => info!(
                "Topic {} already exists on {}, continuing",
                topic.name,
                kafka.broker_address()
            ),
        }
        Ok(outcome)
    }
}

/// Admin used when the Kafka client is compiled out; every request fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableTopicAdmin;

#[async_trait]
impl TopicAdmin for UnavailableTopicAdmin {
    async fn create_topic(
        &self,
        _broker: &KafkaTransport,
        topic: &TopicConfig,
    ) -> Result<TopicCreation, ProvisionError> {
        Err(ProvisionError::Client(format!(
            "cannot create topic {}: Kafka admin requires 'kafka' feature",
            topic.name
        )))
    }
}

// =============================================================================
// Kafka admin client (requires the `kafka` feature)
// =============================================================================

#[cfg(feature = "kafka")]
mod kafka_impl {
    use super::*;
    use crate::transport::kafka::client_properties;
    use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
    use rdkafka::client::DefaultClientContext;
    use rdkafka::config::ClientConfig;
    use rdkafka::types::RDKafkaErrorCode;

    /// [`TopicAdmin`] backed by the rdkafka admin API.
    #[derive(Debug, Clone)]
    pub struct KafkaTopicAdmin {
        request_timeout: Duration,
    }

    impl KafkaTopicAdmin {
        pub fn new(request_timeout: Duration) -> Self {
            Self { request_timeout }
        }

        fn client(
            &self,
            broker: &KafkaTransport,
        ) -> Result<AdminClient<DefaultClientContext>, ProvisionError> {
            let mut client_config = ClientConfig::new();
            for (key, value) in client_properties(broker) {
                client_config.set(key, value);
            }
            client_config.set("client.id", "tidewire-admin");
            client_config
                .create()
                .map_err(|e| ProvisionError::Client(e.to_string()))
        }
    }

    #[async_trait]
    impl TopicAdmin for KafkaTopicAdmin {
        async fn create_topic(
            &self,
            broker: &KafkaTransport,
            topic: &TopicConfig,
        ) -> Result<TopicCreation, ProvisionError> {
            let admin = self.client(broker)?;

            let entries = topic.entries();
            let mut new_topic = NewTopic::new(
                &topic.name,
                topic.partitions,
                TopicReplication::Fixed(topic.replication_factor),
            );
            for (key, value) in &entries {
                new_topic = new_topic.set(key, value);
            }

            let admin_opts = AdminOptions::new()
                .operation_timeout(Some(self.request_timeout))
                .request_timeout(Some(self.request_timeout));

            let results = admin
                .create_topics(&[new_topic], &admin_opts)
                .await
                .map_err(|e| ProvisionError::Client(e.to_string()))?;

            let mut outcome = TopicCreation::Created;
            for result in results {
                match result {
                    Ok(_) => {}
                    Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        outcome = TopicCreation::AlreadyExisted;
                    }
                    Err((name, code)) => {
                        return Err(ProvisionError::Rejected {
                            topic: name,
                            reason: code.to_string(),
                        });
                    }
                }
            }
            Ok(outcome)
        }
    }
}

#[cfg(feature = "kafka")]
pub use kafka_impl::KafkaTopicAdmin;
