//! Runtime sink dispatcher
//!
//! Turns an element's output grounding into a connected producer plus a wire
//! format and hands both to the hosting engine. The dispatcher owns nothing
//! after a successful bind: the engine becomes the producer's sole owner.

use crate::engine::{AttachRejected, EngineError, ExecutionHandle};
use crate::format::{DataFormat, FormatError, FormatRegistry};
use crate::transport::{ProducerError, ProducerFactory, TransportProducer};
use std::fmt;
use std::sync::Arc;
use tidewire_core::{EventGrounding, GroundingError, ProtocolKind, TransportProtocol};
use tracing::{info, warn};

/// Errors raised while binding an element's output.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unsupported transport protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Unsupported transport format: {0:?}")]
    UnsupportedFormat(Vec<String>),

    #[error("Invalid output grounding: {0}")]
    InvalidGrounding(String),

    #[error("Output producer failed: {0}")]
    Producer(#[from] ProducerError),

    #[error("Element output is already bound on {0} engine")]
    AlreadyBound(String),

    #[error("Engine rejected output: {0}")]
    Engine(EngineError),
}

impl From<GroundingError> for DispatchError {
    fn from(e: GroundingError) -> Self {
        match e {
            GroundingError::UnsupportedProtocol(tag) => DispatchError::UnsupportedProtocol(tag),
            other => DispatchError::InvalidGrounding(other.to_string()),
        }
    }
}

/// Connected output handed to an engine.
pub struct OutputBinding {
    pub kind: ProtocolKind,
    pub format: Arc<dyn DataFormat>,
    pub producer: Box<dyn TransportProducer>,
}

impl fmt::Debug for OutputBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBinding")
            .field("kind", &self.kind)
            .field("format", &self.format.id())
            .field("state", &self.producer.state())
            .finish()
    }
}

/// Element start request from the pipeline manager.
#[derive(Debug, Clone)]
pub struct ElementInvocation {
    pub element_id: String,
    /// Output grounding in its declarative form.
    pub output_grounding: serde_json::Value,
}

impl ElementInvocation {
    pub fn new(element_id: &str, output_grounding: serde_json::Value) -> Self {
        Self {
            element_id: element_id.to_string(),
            output_grounding,
        }
    }
}

/// Resolves groundings to sinks and binds them into engines.
#[derive(Clone)]
pub struct SinkDispatcher {
    producers: ProducerFactory,
    formats: FormatRegistry,
}

impl SinkDispatcher {
    pub fn new(producers: ProducerFactory, formats: FormatRegistry) -> Self {
        Self { producers, formats }
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    /// Construct the sink matching the protocol variant.
    pub fn resolve_sink(&self, protocol: &TransportProtocol) -> Box<dyn TransportProducer> {
        match protocol {
            TransportProtocol::Kafka(_) => Box::new(self.producers.kafka_producer()),
            TransportProtocol::Jms(_) => Box::new(self.producers.jms_producer()),
            TransportProtocol::Mqtt(_) => Box::new(self.producers.mqtt_producer()),
        }
    }

    /// Resolve, connect and attach the output described by `grounding`.
    ///
    /// Returns once the producer is connected (topic provisioning included)
    /// and owned by `engine`.
    pub async fn bind_output(
        &self,
        grounding: &EventGrounding,
        engine: &mut dyn ExecutionHandle,
    ) -> Result<(), DispatchError> {
        if engine.has_output() {
            return Err(DispatchError::AlreadyBound(engine.engine_kind().to_string()));
        }

        let format = self
            .formats
            .resolve(&grounding.transport_formats)
            .map_err(|e| match e {
                FormatError::Unsupported(ids) => DispatchError::UnsupportedFormat(ids),
                other => DispatchError::UnsupportedFormat(vec![other.to_string()]),
            })?;

        let protocol = &grounding.transport_protocol;
        let mut producer = self.resolve_sink(protocol);
        producer.connect(protocol).await?;

        let binding = OutputBinding {
            kind: producer.kind(),
            format: format.clone(),
            producer,
        };
        if let Err(rejected) = engine.attach_output(binding) {
            let AttachRejected { error, mut binding } = rejected;
            if let Err(e) = binding.producer.disconnect().await {
                warn!(
                    "Failed to close refused {} output on {}: {}",
                    binding.kind,
                    protocol.broker_address(),
                    e
                );
            }
            return Err(match error {
                EngineError::AlreadyBound(kind) => DispatchError::AlreadyBound(kind),
                other => DispatchError::Engine(other),
            });
        }

        info!(
            "Bound {} output on {} to {} ({})",
            engine.engine_kind(),
            protocol.broker_address(),
            protocol.topic_name(),
            format.id()
        );
        Ok(())
    }

    /// Decode the invocation's output grounding, then bind it.
    pub async fn bind_invocation(
        &self,
        invocation: &ElementInvocation,
        engine: &mut dyn ExecutionHandle,
    ) -> Result<(), DispatchError> {
        let grounding = EventGrounding::from_value(invocation.output_grounding.clone())?;
        info!("Binding output of element {}", invocation.element_id);
        self.bind_output(&grounding, engine).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::transport::MemoryBroker;
    use tidewire_core::{FormatId, JmsTransport, KafkaTransport, MqttTransport};

    fn dispatcher(broker: &MemoryBroker) -> SinkDispatcher {
        SinkDispatcher::new(
            ProducerFactory::in_memory(broker, TransportSettings::default()),
            FormatRegistry::with_defaults(),
        )
    }

    #[test]
    fn test_resolve_sink_matches_tag() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker);
        let protocols = [
            TransportProtocol::Kafka(KafkaTransport::new("kafka", 9092, "t")),
            TransportProtocol::Jms(JmsTransport::new("activemq", 61613, "t")),
            TransportProtocol::Mqtt(MqttTransport::new("mqtt", 1883, "t")),
        ];
        for protocol in &protocols {
            let sink = d.resolve_sink(protocol);
            assert_eq!(sink.kind(), protocol.kind());
            assert!(!sink.is_connected());
        }
    }

    #[test]
    fn test_grounding_error_mapping() {
        assert!(matches!(
            DispatchError::from(GroundingError::UnsupportedProtocol("amqp".into())),
            DispatchError::UnsupportedProtocol(tag) if tag == "amqp"
        ));
        assert!(matches!(
            DispatchError::from(GroundingError::EmptyFormats),
            DispatchError::InvalidGrounding(_)
        ));
    }

    #[test]
    fn test_binding_debug_shows_state() {
        let broker = MemoryBroker::new();
        let d = dispatcher(&broker);
        let binding = OutputBinding {
            kind: ProtocolKind::Mqtt,
            format: d.formats().resolve(&[FormatId::json()]).unwrap(),
            producer: d.resolve_sink(&TransportProtocol::Mqtt(MqttTransport::new("m", 1883, "t"))),
        };
        let debug = format!("{:?}", binding);
        assert!(debug.contains("Mqtt"));
        assert!(debug.contains("Disconnected"));
    }
}
