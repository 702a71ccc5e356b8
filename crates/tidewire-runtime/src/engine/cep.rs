//! Single-node complex event processing engine

use super::{
    apply_logic, AttachRejected, ElementLogic, EngineError, EngineKind, ExecutionHandle,
};
use crate::dispatch::OutputBinding;
use crate::event::Event;
use tidewire_core::ProtocolKind;
use tracing::info;

/// Output callback of a CEP element: encodes and publishes each emitted event.
pub struct OutputCollector {
    binding: OutputBinding,
    emitted: u64,
}

impl OutputCollector {
    pub fn new(binding: OutputBinding) -> Self {
        Self { binding, emitted: 0 }
    }

    pub fn kind(&self) -> ProtocolKind {
        self.binding.kind
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub async fn collect(&mut self, event: &Event) -> Result<(), EngineError> {
        let payload = self.binding.format.to_bytes(event)?;
        self.binding.producer.publish(&payload).await?;
        self.emitted += 1;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), EngineError> {
        self.binding.producer.disconnect().await?;
        Ok(())
    }
}

/// CEP engine hosting one element.
pub struct CepEngine {
    name: String,
    logic: Vec<Box<dyn ElementLogic>>,
    output: Option<OutputCollector>,
    events_processed: u64,
}

impl CepEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            logic: Vec::new(),
            output: None,
            events_processed: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed
    }

    pub fn output(&self) -> Option<&OutputCollector> {
        self.output.as_ref()
    }

    /// Process one event; returns how many events were published.
    pub async fn on_event(&mut self, event: Event) -> Result<usize, EngineError> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| EngineError::NotBound(self.name.clone()))?;

        self.events_processed += 1;
        let emitted = apply_logic(&mut self.logic, event);
        for out in &emitted {
            output.collect(out).await?;
        }
        Ok(emitted.len())
    }

    /// Disconnect the output. The engine cannot be restarted afterwards.
    pub async fn shutdown(&mut self) -> Result<(), EngineError> {
        if let Some(mut output) = self.output.take() {
            output.close().await?;
            info!(
                "CEP engine {} shut down after {} events ({} emitted)",
                self.name,
                self.events_processed,
                output.emitted()
            );
        }
        Ok(())
    }
}

impl ExecutionHandle for CepEngine {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Cep
    }

    fn append_logic(&mut self, logic: Box<dyn ElementLogic>) {
        self.logic.push(logic);
    }

    fn has_output(&self) -> bool {
        self.output.is_some()
    }

    fn attach_output(&mut self, binding: OutputBinding) -> Result<(), AttachRejected> {
        if self.output.is_some() {
            return Err(AttachRejected::new(
                EngineError::AlreadyBound(self.name.clone()),
                binding,
            ));
        }
        self.output = Some(OutputCollector::new(binding));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::format::JsonFormat;
    use crate::transport::{MemoryBroker, ProducerFactory, TransportProducer};
    use std::sync::Arc;
    use tidewire_core::{JmsTransport, TransportProtocol};

    async fn bound_engine(broker: &MemoryBroker) -> CepEngine {
        let protocol = TransportProtocol::Jms(JmsTransport::new("activemq", 61613, "alerts"));
        let mut producer =
            ProducerFactory::in_memory(broker, TransportSettings::default()).jms_producer();
        producer.connect(&protocol).await.unwrap();

        let mut engine = CepEngine::new("threshold");
        engine
            .attach_output(OutputBinding {
                kind: ProtocolKind::Jms,
                format: Arc::new(JsonFormat),
                producer: Box::new(producer),
            })
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_on_event_publishes_matches() {
        let broker = MemoryBroker::new();
        let mut engine = bound_engine(&broker).await;
        engine.append_logic(Box::new(|e: Event, out: &mut Vec<Event>| {
            if e.get_float("temperature").unwrap_or(0.0) > 30.0 {
                out.push(Event::new("Alert").with_field("sensor", "s1"));
            }
        }));

        let cold = Event::new("Reading").with_field("temperature", 20.0);
        let hot = Event::new("Reading").with_field("temperature", 35.0);
        assert_eq!(engine.on_event(cold).await.unwrap(), 0);
        assert_eq!(engine.on_event(hot).await.unwrap(), 1);

        assert_eq!(engine.events_processed(), 2);
        assert_eq!(engine.output().map(|o| o.emitted()), Some(1));
        assert_eq!(broker.payloads("alerts"), vec![br#"{"sensor":"s1"}"#.to_vec()]);
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_output() {
        let broker = MemoryBroker::new();
        let mut engine = bound_engine(&broker).await;
        assert_eq!(broker.open_channels(), 1);

        engine.shutdown().await.unwrap();
        assert_eq!(broker.open_channels(), 0);
        assert!(!engine.has_output());
        assert!(matches!(
            engine.on_event(Event::new("Late")).await,
            Err(EngineError::NotBound(_))
        ));
    }

    #[tokio::test]
    async fn test_unbound_engine_rejects_events() {
        let mut engine = CepEngine::new("idle");
        assert!(matches!(
            engine.on_event(Event::new("E")).await,
            Err(EngineError::NotBound(name)) if name == "idle"
        ));
        assert_eq!(engine.events_processed(), 0);
    }
}
