//! Kafka producer
//!
//! Before opening its channel the producer asks the [`TopicProvisioner`] to
//! create the descriptor's topic. A provisioning failure is logged and the
//! connect sequence continues: the broker may still accept writes (for
//! example when the topic exists or auto-creation is enabled).

use super::{expect_variant, ChannelSlot, ProducerError, TransportProducer};
use crate::provision::TopicProvisioner;
use async_trait::async_trait;
use indexmap::IndexMap;
use tidewire_core::{KafkaTransport, ProducerState, ProtocolKind, TransportProtocol};
use tracing::{info, warn};

/// Connection-level client properties: bootstrap address and SASL.
pub fn client_properties(kafka: &KafkaTransport) -> IndexMap<String, String> {
    let mut props = IndexMap::new();
    props.insert("bootstrap.servers".to_string(), kafka.broker_address());
    if let Some(credentials) = &kafka.credentials {
        props.insert("security.protocol".to_string(), "SASL_PLAINTEXT".to_string());
        props.insert("sasl.mechanism".to_string(), "PLAIN".to_string());
        props.insert("sasl.username".to_string(), credentials.username.clone());
        props.insert("sasl.password".to_string(), credentials.password.clone());
    }
    props
}

/// Full producer configuration for a descriptor.
///
/// Each producer gets a fresh random `client.id`.
pub fn producer_properties(kafka: &KafkaTransport) -> IndexMap<String, String> {
    let mut props = client_properties(kafka);
    props.insert("client.id".to_string(), uuid::Uuid::new_v4().to_string());
    props.insert("message.timeout.ms".to_string(), "30000".to_string());
    // Batching defaults
    props.insert("linger.ms".to_string(), "5".to_string());
    props.insert("batch.size".to_string(), "65536".to_string());
    props.insert("acks".to_string(), "all".to_string());
    props
}

/// Producer for Kafka descriptors.
pub struct KafkaProducer {
    slot: ChannelSlot,
    provisioner: TopicProvisioner,
}

impl KafkaProducer {
    pub(crate) fn new(slot: ChannelSlot, provisioner: TopicProvisioner) -> Self {
        Self { slot, provisioner }
    }
}

#[async_trait]
impl TransportProducer for KafkaProducer {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Kafka
    }

    fn state(&self) -> ProducerState {
        self.slot.state()
    }

    async fn connect(&mut self, protocol: &TransportProtocol) -> Result<(), ProducerError> {
        self.slot.begin_connect(protocol, ProtocolKind::Kafka)?;
        let kafka = expect_variant!(protocol, Kafka, ProtocolKind::Kafka);

        if let Err(e) = self.provisioner.ensure_topic(kafka).await {
            warn!(
                "Provisioning topic {} on {} failed, connecting anyway: {}",
                kafka.topic_name,
                kafka.broker_address(),
                e
            );
        }

        self.slot.open(protocol).await?;
        info!(
            "Kafka producer connected to {} (topic {})",
            kafka.broker_address(),
            kafka.topic_name
        );
        Ok(())
    }

    async fn publish(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
        self.slot.publish(payload).await
    }

    async fn disconnect(&mut self) -> Result<(), ProducerError> {
        let was_connected = self.slot.state() == ProducerState::Connected;
        self.slot.close().await?;
        if was_connected {
            info!("Kafka producer disconnected");
        }
        Ok(())
    }
}

// =============================================================================
// rdkafka channel (requires the `kafka` feature)
// =============================================================================

#[cfg(feature = "kafka")]
mod kafka_impl {
    use super::*;
    use crate::transport::{ChannelConnector, OutboundChannel};
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
    use std::time::Duration;

    /// Opens rdkafka producers.
    #[derive(Debug, Clone)]
    pub struct KafkaConnector {
        flush_timeout: Duration,
    }

    impl KafkaConnector {
        pub fn new(flush_timeout: Duration) -> Self {
            Self { flush_timeout }
        }
    }

    #[async_trait]
    impl ChannelConnector for KafkaConnector {
        async fn open(
            &self,
            protocol: &TransportProtocol,
        ) -> Result<Box<dyn OutboundChannel>, ProducerError> {
            let kafka = expect_variant!(protocol, Kafka, ProtocolKind::Kafka);

            let mut client_config = ClientConfig::new();
            for (key, value) in producer_properties(kafka) {
                client_config.set(key, value);
            }
            let producer: ThreadedProducer<DefaultProducerContext> = client_config
                .create()
                .map_err(|e| ProducerError::ConnectFailed(e.to_string()))?;

            Ok(Box::new(KafkaChannel {
                producer,
                topic: kafka.topic_name.clone(),
                flush_timeout: self.flush_timeout,
            }))
        }
    }

    struct KafkaChannel {
        producer: ThreadedProducer<DefaultProducerContext>,
        topic: String,
        flush_timeout: Duration,
    }

    #[async_trait]
    impl OutboundChannel for KafkaChannel {
        async fn send(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
            // Enqueue only; delivery reports are handled by the client.
            self.producer
                .send(BaseRecord::<(), [u8]>::to(&self.topic).payload(payload))
                .map_err(|(e, _)| ProducerError::PublishFailed(e.to_string()))
        }

        async fn close(&mut self) -> Result<(), ProducerError> {
            self.producer
                .flush(self.flush_timeout)
                .map_err(|e| ProducerError::PublishFailed(format!("flush: {}", e)))
        }
    }
}

#[cfg(feature = "kafka")]
pub use kafka_impl::KafkaConnector;
