//! Transport producers: one outbound broker channel per producer
//!
//! A producer walks `Disconnected -> Connecting -> Connected` on a successful
//! [`TransportProducer::connect`] and drops back to `Disconnected` on failure,
//! timeout or [`TransportProducer::disconnect`]. `publish` is only accepted
//! while `Connected`.
//!
//! Broker clients sit behind [`ChannelConnector`]:
//! - Kafka: rdkafka, requires the `kafka` feature
//! - MQTT: rumqttc, requires the `mqtt` feature
//! - JMS: the broker's STOMP endpoint over TCP, always available
//! - [`MemoryBroker`]: in-process, for tests and dry runs

pub mod jms;
pub mod kafka;
pub mod memory;
pub mod mqtt;

pub use jms::{JmsProducer, StompConnector};
pub use kafka::{producer_properties, KafkaProducer};
pub use memory::{MemoryBroker, PublishedMessage};
pub use mqtt::MqttProducer;

use crate::config::TransportSettings;
use crate::provision::{TopicAdmin, TopicProvisioner};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tidewire_core::{ProducerState, ProtocolKind, TransportProtocol};

/// Errors raised by transport producers and their channels.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    /// `connect` was called on a producer that is already connected.
    #[error("Producer is already connected")]
    AlreadyConnected,

    /// `publish` was called outside the `Connected` state.
    #[error("Producer is not connected")]
    NotConnected,

    #[error("Producer for {expected} cannot connect to a {found} transport")]
    ProtocolMismatch {
        expected: ProtocolKind,
        found: ProtocolKind,
    },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// The broker client was compiled out (see the crate's feature flags).
    #[error("Transport not available: {0}")]
    NotAvailable(String),
}

/// Producer capability, implemented once per protocol variant.
///
/// A producer is owned by exactly one execution context and is never called
/// concurrently; ordering between `connect` and `publish` is enforced by the
/// state check alone.
#[async_trait]
pub trait TransportProducer: Send {
    /// Protocol this producer speaks.
    fn kind(&self) -> ProtocolKind;

    fn state(&self) -> ProducerState;

    fn is_connected(&self) -> bool {
        self.state() == ProducerState::Connected
    }

    /// Open the broker channel described by `protocol`.
    ///
    /// # Errors
    ///
    /// - [`ProducerError::AlreadyConnected`] if the producer is connected.
    /// - [`ProducerError::ProtocolMismatch`] if `protocol` is another variant.
    /// - [`ProducerError::ConnectFailed`] / [`ProducerError::ConnectTimeout`]
    ///   if the broker cannot be reached; the producer is then `Disconnected`.
    async fn connect(&mut self, protocol: &TransportProtocol) -> Result<(), ProducerError>;

    /// Hand one payload to the broker client. Delivery acknowledgement is the
    /// client's concern.
    async fn publish(&mut self, payload: &[u8]) -> Result<(), ProducerError>;

    /// Close the channel. Safe from any state.
    async fn disconnect(&mut self) -> Result<(), ProducerError>;
}

/// Opens outbound channels for one protocol.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(
        &self,
        protocol: &TransportProtocol,
    ) -> Result<Box<dyn OutboundChannel>, ProducerError>;
}

/// A live, exclusively owned broker channel.
#[async_trait]
pub trait OutboundChannel: Send {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ProducerError>;

    async fn close(&mut self) -> Result<(), ProducerError>;
}

/// Connector for a broker client that is not compiled into this build.
#[derive(Debug, Clone)]
pub struct UnavailableConnector {
    kind: ProtocolKind,
    feature: &'static str,
}

impl UnavailableConnector {
    pub fn new(kind: ProtocolKind, feature: &'static str) -> Self {
        Self { kind, feature }
    }
}

#[async_trait]
impl ChannelConnector for UnavailableConnector {
    async fn open(
        &self,
        _protocol: &TransportProtocol,
    ) -> Result<Box<dyn OutboundChannel>, ProducerError> {
        Err(ProducerError::NotAvailable(format!(
            "{} transport requires '{}' feature. Enable with: cargo build --features {}",
            self.kind, self.feature, self.feature
        )))
    }
}

/// State machine plus channel shared by every producer variant.
pub(crate) struct ChannelSlot {
    connector: Arc<dyn ChannelConnector>,
    connect_timeout: Duration,
    state: ProducerState,
    channel: Option<Box<dyn OutboundChannel>>,
}

impl ChannelSlot {
    pub(crate) fn new(connector: Arc<dyn ChannelConnector>, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
            state: ProducerState::Disconnected,
            channel: None,
        }
    }

    pub(crate) fn state(&self) -> ProducerState {
        self.state
    }

    /// Enter `Connecting`. A connected slot refuses before the descriptor is
    /// looked at. A slot left in `Connecting` by an abandoned connect future
    /// may start over.
    pub(crate) fn begin_connect(
        &mut self,
        protocol: &TransportProtocol,
        expected: ProtocolKind,
    ) -> Result<(), ProducerError> {
        if self.state == ProducerState::Connected {
            return Err(ProducerError::AlreadyConnected);
        }
        if protocol.kind() != expected {
            return Err(ProducerError::ProtocolMismatch {
                expected,
                found: protocol.kind(),
            });
        }
        self.state = ProducerState::Connecting;
        Ok(())
    }

    pub(crate) async fn open(&mut self, protocol: &TransportProtocol) -> Result<(), ProducerError> {
        let outcome =
            tokio::time::timeout(self.connect_timeout, self.connector.open(protocol)).await;
        match outcome {
            Ok(Ok(channel)) => {
                self.channel = Some(channel);
                self.state = ProducerState::Connected;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ProducerState::Disconnected;
                Err(e)
            }
            Err(_) => {
                self.state = ProducerState::Disconnected;
                Err(ProducerError::ConnectTimeout(self.connect_timeout))
            }
        }
    }

    pub(crate) async fn publish(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
        if self.state != ProducerState::Connected {
            return Err(ProducerError::NotConnected);
        }
        match self.channel.as_mut() {
            Some(channel) => channel.send(payload).await,
            None => Err(ProducerError::NotConnected),
        }
    }

    pub(crate) async fn close(&mut self) -> Result<(), ProducerError> {
        self.state = ProducerState::Disconnected;
        match self.channel.take() {
            Some(mut channel) => channel.close().await,
            None => Ok(()),
        }
    }
}

/// Builds producers wired to the process's broker clients and settings.
#[derive(Clone)]
pub struct ProducerFactory {
    kafka: Arc<dyn ChannelConnector>,
    jms: Arc<dyn ChannelConnector>,
    mqtt: Arc<dyn ChannelConnector>,
    provisioner: TopicProvisioner,
    settings: TransportSettings,
}

impl ProducerFactory {
    pub fn new(
        kafka: Arc<dyn ChannelConnector>,
        jms: Arc<dyn ChannelConnector>,
        mqtt: Arc<dyn ChannelConnector>,
        admin: Arc<dyn TopicAdmin>,
        settings: TransportSettings,
    ) -> Self {
        Self {
            kafka,
            jms,
            mqtt,
            provisioner: TopicProvisioner::new(admin, settings.clone()),
            settings,
        }
    }

    /// Every protocol and the topic admin backed by one in-process broker.
    pub fn in_memory(broker: &MemoryBroker, settings: TransportSettings) -> Self {
        let shared = Arc::new(broker.clone());
        Self::new(shared.clone(), shared.clone(), shared.clone(), shared, settings)
    }

    /// Real broker clients for every protocol compiled into this build.
    pub fn from_settings(settings: TransportSettings) -> Self {
        #[cfg(feature = "kafka")]
        let (kafka, admin): (Arc<dyn ChannelConnector>, Arc<dyn TopicAdmin>) = (
            Arc::new(kafka::KafkaConnector::new(settings.flush_timeout())),
            Arc::new(crate::provision::KafkaTopicAdmin::new(settings.provision_timeout())),
        );
        #[cfg(not(feature = "kafka"))]
        let (kafka, admin): (Arc<dyn ChannelConnector>, Arc<dyn TopicAdmin>) = (
            Arc::new(UnavailableConnector::new(ProtocolKind::Kafka, "kafka")),
            Arc::new(crate::provision::UnavailableTopicAdmin),
        );

        #[cfg(feature = "mqtt")]
        let mqtt: Arc<dyn ChannelConnector> = Arc::new(mqtt::MqttConnector::new());
        #[cfg(not(feature = "mqtt"))]
        let mqtt: Arc<dyn ChannelConnector> =
            Arc::new(UnavailableConnector::new(ProtocolKind::Mqtt, "mqtt"));

        Self::new(kafka, Arc::new(StompConnector::new()), mqtt, admin, settings)
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    pub fn provisioner(&self) -> &TopicProvisioner {
        &self.provisioner
    }

    pub fn kafka_producer(&self) -> KafkaProducer {
        KafkaProducer::new(
            ChannelSlot::new(self.kafka.clone(), self.settings.connect_timeout()),
            self.provisioner.clone(),
        )
    }

    pub fn jms_producer(&self) -> JmsProducer {
        JmsProducer::new(ChannelSlot::new(self.jms.clone(), self.settings.connect_timeout()))
    }

    pub fn mqtt_producer(&self) -> MqttProducer {
        MqttProducer::new(ChannelSlot::new(self.mqtt.clone(), self.settings.connect_timeout()))
    }
}

/// Extract the variant a producer expects, or report the mismatch.
macro_rules! expect_variant {
    ($protocol:expr, $variant:ident, $kind:expr) => {
        match $protocol {
            tidewire_core::TransportProtocol::$variant(descriptor) => descriptor,
            other => {
                return Err($crate::transport::ProducerError::ProtocolMismatch {
                    expected: $kind,
                    found: other.kind(),
                })
            }
        }
    };
}
pub(crate) use expect_variant;

#[cfg(test)]
mod tests {
    use super::*;
    use tidewire_core::{JmsTransport, KafkaTransport, MqttTransport};

    fn factory(broker: &MemoryBroker) -> ProducerFactory {
        ProducerFactory::in_memory(broker, TransportSettings::default())
    }

    #[tokio::test]
    async fn test_publish_before_connect_fails() {
        let broker = MemoryBroker::new();
        let mut producer = factory(&broker).mqtt_producer();
        assert!(matches!(
            producer.publish(b"x").await,
            Err(ProducerError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_twice_is_rejected() {
        let broker = MemoryBroker::new();
        let mut producer = factory(&broker).jms_producer();
        let protocol = TransportProtocol::Jms(JmsTransport::new("activemq", 61613, "t"));

        producer.connect(&protocol).await.unwrap();
        assert!(matches!(
            producer.connect(&protocol).await,
            Err(ProducerError::AlreadyConnected)
        ));
        assert_eq!(broker.open_channels(), 1);
    }

    #[tokio::test]
    async fn test_protocol_mismatch() {
        let broker = MemoryBroker::new();
        let mut producer = factory(&broker).kafka_producer();
        let protocol = TransportProtocol::Mqtt(MqttTransport::new("mqtt", 1883, "t"));

        let result = producer.connect(&protocol).await;
        assert!(matches!(
            result,
            Err(ProducerError::ProtocolMismatch {
                expected: ProtocolKind::Kafka,
                found: ProtocolKind::Mqtt
            })
        ));
        assert_eq!(producer.state(), ProducerState::Disconnected);
    }

    #[tokio::test]
    async fn test_connected_producer_refuses_any_descriptor() {
        let broker = MemoryBroker::new();
        let mut producer = factory(&broker).kafka_producer();
        producer
            .connect(&TransportProtocol::Kafka(KafkaTransport::new("kafka", 9092, "t")))
            .await
            .unwrap();

        let other = TransportProtocol::Mqtt(MqttTransport::new("mqtt", 1883, "t"));
        assert!(matches!(
            producer.connect(&other).await,
            Err(ProducerError::AlreadyConnected)
        ));
        assert_eq!(producer.state(), ProducerState::Connected);
        assert_eq!(broker.open_channels(), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_leaves_disconnected() {
        let broker = MemoryBroker::new();
        broker.refuse_connections(ProtocolKind::Kafka);
        let mut producer = factory(&broker).kafka_producer();

        let result = producer
            .connect(&TransportProtocol::Kafka(KafkaTransport::new("kafka", 9092, "t")))
            .await;
        assert!(matches!(result, Err(ProducerError::ConnectFailed(_))));
        assert_eq!(producer.state(), ProducerState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_terminal() {
        let broker = MemoryBroker::new();
        broker.stall_connections(true);
        let settings = TransportSettings::default().with_connect_timeout(Duration::from_millis(50));
        let mut producer = ProducerFactory::in_memory(&broker, settings).mqtt_producer();

        let result = producer
            .connect(&TransportProtocol::Mqtt(MqttTransport::new("mqtt", 1883, "t")))
            .await;
        assert!(matches!(result, Err(ProducerError::ConnectTimeout(_))));
        assert_eq!(producer.state(), ProducerState::Disconnected);
    }

    #[tokio::test]
    async fn test_unavailable_connector() {
        let connector = UnavailableConnector::new(ProtocolKind::Kafka, "kafka");
        let protocol = TransportProtocol::Kafka(KafkaTransport::new("kafka", 9092, "t"));
        match connector.open(&protocol).await {
            Err(ProducerError::NotAvailable(msg)) => assert!(msg.contains("--features kafka")),
            _ => panic!("expected NotAvailable"),
        }
    }
}
