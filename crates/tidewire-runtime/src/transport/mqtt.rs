//! MQTT producer

use super::{expect_variant, ChannelSlot, ProducerError, TransportProducer};
use async_trait::async_trait;
use tidewire_core::{ProducerState, ProtocolKind, TransportProtocol};
use tracing::info;

/// Producer for MQTT descriptors.
pub struct MqttProducer {
    slot: ChannelSlot,
}

impl MqttProducer {
    pub(crate) fn new(slot: ChannelSlot) -> Self {
        Self { slot }
    }
}

#[async_trait]
impl TransportProducer for MqttProducer {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Mqtt
    }

    fn state(&self) -> ProducerState {
        self.slot.state()
    }

    async fn connect(&mut self, protocol: &TransportProtocol) -> Result<(), ProducerError> {
        self.slot.begin_connect(protocol, ProtocolKind::Mqtt)?;
        let mqtt = expect_variant!(protocol, Mqtt, ProtocolKind::Mqtt);
        self.slot.open(protocol).await?;
        info!(
            "MQTT producer connected to {}:{} (topic {})",
            mqtt.broker_hostname, mqtt.port, mqtt.topic_name
        );
        Ok(())
    }

    async fn publish(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
        self.slot.publish(payload).await
    }

    async fn disconnect(&mut self) -> Result<(), ProducerError> {
        self.slot.close().await
    }
}

// =============================================================================
// rumqttc channel (requires the `mqtt` feature)
// =============================================================================

#[cfg(feature = "mqtt")]
mod mqtt_impl {
    use super::*;
    use crate::transport::{ChannelConnector, OutboundChannel};
    use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{error, warn};

    const MAX_CONSECUTIVE_ERRORS: u32 = 10;
    const MAX_BACKOFF_SECS: u64 = 30;

    /// Opens rumqttc clients; waits for the broker's CONNACK before
    /// handing out the channel.
    #[derive(Debug, Clone, Default)]
    pub struct MqttConnector;

    impl MqttConnector {
        pub fn new() -> Self {
            Self
        }
    }

    #[async_trait]
    impl ChannelConnector for MqttConnector {
        async fn open(
            &self,
            protocol: &TransportProtocol,
        ) -> Result<Box<dyn OutboundChannel>, ProducerError> {
            let mqtt = expect_variant!(protocol, Mqtt, ProtocolKind::Mqtt);

            let client_id = format!("tidewire-{}", uuid::Uuid::new_v4());
            let mut mqtt_opts = MqttOptions::new(client_id, &mqtt.broker_hostname, mqtt.port);
            mqtt_opts.set_keep_alive(Duration::from_secs(60));

            let (client, mut eventloop) = AsyncClient::new(mqtt_opts, 10_000);

            loop {
                match eventloop.poll().await {
                    Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => break,
                    Ok(_) => {}
                    Err(e) => return Err(ProducerError::ConnectFailed(e.to_string())),
                }
            }

            let running = Arc::new(AtomicBool::new(true));
            let loop_running = running.clone();
            let address = protocol.broker_address();
            tokio::spawn(async move {
                let mut consecutive_errors: u32 = 0;
                while loop_running.load(Ordering::SeqCst) {
                    match eventloop.poll().await {
                        Ok(_) => consecutive_errors = 0,
                        Err(e) => {
                            if !loop_running.load(Ordering::SeqCst) {
                                break;
                            }
                            consecutive_errors += 1;
                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                error!(
                                    "MQTT channel to {} stopped after {} consecutive errors",
                                    address, MAX_CONSECUTIVE_ERRORS
                                );
                                loop_running.store(false, Ordering::SeqCst);
                                break;
                            }
                            let backoff_secs =
                                (1u64 << (consecutive_errors - 1).min(5)).min(MAX_BACKOFF_SECS);
                            warn!(
                                "MQTT channel to {} error (attempt {}/{}): {:?}, retrying in {}s",
                                address, consecutive_errors, MAX_CONSECUTIVE_ERRORS, e, backoff_secs
                            );
                            tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                        }
                    }
                }
            });

            Ok(Box::new(MqttChannel {
                client,
                topic: mqtt.topic_name.clone(),
                running,
            }))
        }
    }

    struct MqttChannel {
        client: AsyncClient,
        topic: String,
        running: Arc<AtomicBool>,
    }

    #[async_trait]
    impl OutboundChannel for MqttChannel {
        async fn send(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
            if !self.running.load(Ordering::SeqCst) {
                return Err(ProducerError::PublishFailed(
                    "MQTT eventloop stopped".to_string(),
                ));
            }
            self.client
                .publish(&self.topic, QoS::AtLeastOnce, false, payload.to_vec())
                .await
                .map_err(|e| ProducerError::PublishFailed(e.to_string()))
        }

        async fn close(&mut self) -> Result<(), ProducerError> {
            self.running.store(false, Ordering::SeqCst);
            // The eventloop may already be gone; nothing left to flush then.
            let _ = self.client.disconnect().await;
            Ok(())
        }
    }
}

#[cfg(feature = "mqtt")]
pub use mqtt_impl::MqttConnector;
