//! Kafka Integration Tests
//!
//! These tests require a running Kafka broker.
//! Run with: cargo test -p tidewire-runtime --features kafka kafka_integration -- --ignored
//!
//! The broker address can be configured via the KAFKA_BOOTSTRAP env var.

#![cfg(feature = "kafka")]

use std::time::Duration;

use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use tidewire_core::{KafkaTransport, TransportProtocol};
use tidewire_runtime::provision::TopicCreation;
use tidewire_runtime::{ProducerFactory, TransportProducer, TransportSettings};

fn kafka_bootstrap() -> String {
    std::env::var("KAFKA_BOOTSTRAP").unwrap_or_else(|_| "localhost:9092".to_string())
}

fn descriptor(topic: &str) -> KafkaTransport {
    KafkaTransport::from_url(&kafka_bootstrap(), topic).expect("KAFKA_BOOTSTRAP must be host:port")
}

async fn kafka_is_available() -> bool {
    let admin: Result<AdminClient<DefaultClientContext>, _> = ClientConfig::new()
        .set("bootstrap.servers", kafka_bootstrap())
        .create();
    match admin {
        Ok(admin) => admin
            .inner()
            .fetch_metadata(None, Duration::from_secs(5))
            .is_ok(),
        Err(_) => false,
    }
}

#[tokio::test]
#[ignore]
async fn test_provision_is_idempotent() {
    if !kafka_is_available().await {
        eprintln!("Skipping test: Kafka not available at {}", kafka_bootstrap());
        return;
    }

    let factory = ProducerFactory::from_settings(TransportSettings::default());
    let topic = format!("tidewire-test-{}", uuid::Uuid::new_v4());
    let kafka = descriptor(&topic);

    let first = factory.provisioner().ensure_topic(&kafka).await.unwrap();
    let second = factory.provisioner().ensure_topic(&kafka).await.unwrap();
    assert_eq!(first, TopicCreation::Created);
    assert_eq!(second, TopicCreation::AlreadyExisted);
}

#[tokio::test]
#[ignore]
async fn test_producer_roundtrip() {
    if !kafka_is_available().await {
        eprintln!("Skipping test: Kafka not available at {}", kafka_bootstrap());
        return;
    }

    let factory = ProducerFactory::from_settings(
        TransportSettings::default().with_connect_timeout(Duration::from_secs(10)),
    );
    let protocol = TransportProtocol::Kafka(descriptor("tidewire-test-output"));
    let mut producer = factory.kafka_producer();

    producer.connect(&protocol).await.unwrap();
    assert!(producer.is_connected());
    producer.publish(br#"{"message":"hello"}"#).await.unwrap();
    producer.disconnect().await.unwrap();
    assert!(!producer.is_connected());
}
