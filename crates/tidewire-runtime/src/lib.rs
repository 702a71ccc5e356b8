//! Tidewire Runtime - transport and runtime binding layer
//!
//! This crate turns the declarative groundings of `tidewire-core` into live
//! broker channels and binds them into execution engines:
//!
//! - [`transport`]: Kafka, JMS and MQTT producers sharing one connect/publish/
//!   disconnect contract
//! - [`provision`]: idempotent Kafka topic creation ahead of the first connect
//! - [`dispatch`]: output grounding to sink resolution, independent of the engine
//! - [`engine`]: the dataflow and CEP engines hosting element logic
//! - [`datalake`]: retention policy and measurement management on the
//!   time-series store
//!
//! # Feature flags
//!
//! - `mqtt` (default): rumqttc MQTT client
//! - `kafka`: rdkafka producer and admin client
//! - `binary-codec`: MessagePack wire format

pub mod config;
pub mod datalake;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod format;
pub mod provision;
pub mod stream;
pub mod transport;

pub use config::{SettingsError, TransportSettings, RETENTION_ENV};
pub use datalake::{
    DataLakeManager, InfluxConfig, InfluxStore, MeasureCatalog, MemoryMeasureCatalog,
    MemoryTimeSeriesStore, QueryResult, RetentionError, StoreError, TimeSeriesStore,
};
pub use dispatch::{DispatchError, ElementInvocation, OutputBinding, SinkDispatcher};
pub use engine::{
    AttachRejected, CepEngine, DataflowEngine, DataflowJob, ElementLogic, EngineError,
    EngineKind, ExecutionHandle, RunReport,
};
pub use event::Event;
pub use format::{DataFormat, FormatError, FormatRegistry, JsonFormat};
pub use provision::{ProvisionError, TopicAdmin, TopicCreation, TopicProvisioner};
pub use stream::{Stream, StreamClosed, StreamSender};
pub use transport::{MemoryBroker, ProducerError, ProducerFactory, TransportProducer};
