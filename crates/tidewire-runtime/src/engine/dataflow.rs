//! Stream-driven dataflow engine
//!
//! Records flow from an input [`Stream`] through the logic stages in order;
//! the bound output is the last stage, which encodes each record and hands it
//! to the producer.

use super::{
    apply_logic, AttachRejected, ElementLogic, EngineError, EngineKind, ExecutionHandle,
};
use crate::dispatch::OutputBinding;
use crate::event::Event;
use crate::stream::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Counters of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    pub records_in: u64,
    pub records_out: u64,
}

/// Dataflow engine hosting one element.
pub struct DataflowEngine {
    name: String,
    stages: Vec<Box<dyn ElementLogic>>,
    sink: Option<OutputBinding>,
}

impl DataflowEngine {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: Vec::new(),
            sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of logic stages, excluding the sink stage.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    async fn sink_stage(sink: &mut OutputBinding, event: &Event) -> Result<(), EngineError> {
        let payload = sink.format.to_bytes(event)?;
        sink.producer.publish(&payload).await?;
        Ok(())
    }

    async fn drive(
        &mut self,
        input: &mut Stream,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<RunReport, EngineError> {
        let mut report = RunReport::default();
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| EngineError::NotBound(self.name.clone()))?;

        loop {
            let event = tokio::select! {
                biased;
                _ = stop.changed() => break,
                next = input.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            report.records_in += 1;
            for out in apply_logic(&mut self.stages, event) {
                Self::sink_stage(sink, &out).await?;
                report.records_out += 1;
            }
        }
        Ok(report)
    }

    /// Drive `input` until it ends or `stop` fires, then disconnect the output.
    async fn run_until(
        mut self,
        mut input: Stream,
        mut stop: watch::Receiver<bool>,
    ) -> Result<RunReport, EngineError> {
        info!("Dataflow engine {} started on stream {}", self.name, input.name());
        let result = self.drive(&mut input, &mut stop).await;

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.producer.disconnect().await {
                warn!("Dataflow engine {}: disconnect failed: {}", self.name, e);
            }
        }
        match &result {
            Ok(report) => info!(
                "Dataflow engine {} stopped ({} in, {} out)",
                self.name, report.records_in, report.records_out
            ),
            Err(e) => warn!("Dataflow engine {} failed: {}", self.name, e),
        }
        result
    }

    /// Drive `input` to completion on the current task.
    pub async fn run(self, input: Stream) -> Result<RunReport, EngineError> {
        // The sender lives until the run completes, so stop never fires.
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.run_until(input, stop_rx).await
    }

    /// Drive `input` on a tokio task.
    pub fn spawn(self, input: Stream) -> DataflowJob {
        let (stop_tx, stop_rx) = watch::channel(false);
        DataflowJob {
            stop: stop_tx,
            handle: tokio::spawn(self.run_until(input, stop_rx)),
        }
    }
}

impl ExecutionHandle for DataflowEngine {
    fn engine_kind(&self) -> EngineKind {
        EngineKind::Dataflow
    }

    fn append_logic(&mut self, logic: Box<dyn ElementLogic>) {
        self.stages.push(logic);
    }

    fn has_output(&self) -> bool {
        self.sink.is_some()
    }

    fn attach_output(&mut self, binding: OutputBinding) -> Result<(), AttachRejected> {
        if self.sink.is_some() {
            return Err(AttachRejected::new(
                EngineError::AlreadyBound(self.name.clone()),
                binding,
            ));
        }
        self.sink = Some(binding);
        Ok(())
    }
}

/// A dataflow run on a background task.
pub struct DataflowJob {
    stop: watch::Sender<bool>,
    handle: JoinHandle<Result<RunReport, EngineError>>,
}

impl DataflowJob {
    /// Stop consuming input, disconnect the output and wait for the task.
    pub async fn stop(self) -> Result<RunReport, EngineError> {
        // Err means the task already finished and dropped its receiver.
        let _ = self.stop.send(true);
        self.join().await
    }

    /// Wait for the input stream to end.
    pub async fn join(self) -> Result<RunReport, EngineError> {
        self.handle
            .await
            .map_err(|e| EngineError::Aborted(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportSettings;
    use crate::format::JsonFormat;
    use crate::stream::channel;
    use crate::transport::{MemoryBroker, ProducerFactory, TransportProducer};
    use std::sync::Arc;
    use tidewire_core::{MqttTransport, ProtocolKind, TransportProtocol};

    async fn bound_engine(broker: &MemoryBroker) -> DataflowEngine {
        let protocol = TransportProtocol::Mqtt(MqttTransport::new("mqtt", 1883, "out"));
        let mut producer = ProducerFactory::in_memory(broker, TransportSettings::default())
            .mqtt_producer();
        producer.connect(&protocol).await.unwrap();

        let mut engine = DataflowEngine::new("doubler");
        engine
            .attach_output(OutputBinding {
                kind: ProtocolKind::Mqtt,
                format: Arc::new(JsonFormat),
                producer: Box::new(producer),
            })
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_run_requires_output() {
        let (_tx, rx) = channel("in", 1);
        let result = DataflowEngine::new("unbound").run(rx).await;
        assert!(matches!(result, Err(EngineError::NotBound(name)) if name == "unbound"));
    }

    #[tokio::test]
    async fn test_run_publishes_stage_output() {
        let broker = MemoryBroker::new();
        let mut engine = bound_engine(&broker).await;
        engine.append_logic(Box::new(|e: Event, out: &mut Vec<Event>| {
            let v = e.get_int("v").unwrap_or(0);
            out.push(Event::new("Doubled").with_field("v", v * 2));
        }));

        let (tx, rx) = channel("in", 8);
        tx.send(Event::new("In").with_field("v", 2i64)).await.unwrap();
        tx.send(Event::new("In").with_field("v", 5i64)).await.unwrap();
        drop(tx);

        let report = engine.run(rx).await.unwrap();
        assert_eq!(report, RunReport { records_in: 2, records_out: 2 });
        assert_eq!(
            broker.payloads("out"),
            vec![br#"{"v":4}"#.to_vec(), br#"{"v":10}"#.to_vec()]
        );
        assert_eq!(broker.open_channels(), 0);
    }

    #[tokio::test]
    async fn test_spawned_job_stops_and_disconnects() {
        let broker = MemoryBroker::new();
        let engine = bound_engine(&broker).await;

        let (tx, rx) = channel("in", 8);
        let job = engine.spawn(rx);
        tx.send(Event::new("In").with_field("v", 1i64)).await.unwrap();
        tokio::task::yield_now().await;

        let report = job.stop().await.unwrap();
        assert!(report.records_in <= 1);
        assert_eq!(broker.open_channels(), 0);
    }

    #[test]
    fn test_attach_twice_is_rejected() {
        let broker = MemoryBroker::new();
        let factory = ProducerFactory::in_memory(&broker, TransportSettings::default());
        let mut engine = DataflowEngine::new("e");
        let binding = || OutputBinding {
            kind: ProtocolKind::Mqtt,
            format: Arc::new(JsonFormat),
            producer: Box::new(factory.mqtt_producer()),
        };

        engine.attach_output(binding()).unwrap();
        let rejected = engine.attach_output(binding()).unwrap_err();
        assert!(matches!(rejected.error, EngineError::AlreadyBound(_)));
        assert_eq!(rejected.binding.kind, ProtocolKind::Mqtt);
    }
}
