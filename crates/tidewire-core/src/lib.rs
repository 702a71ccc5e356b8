//! # Tidewire Core
//!
//! Value objects shared by the tidewire transport binding layer.
//!
//! Nothing in this crate talks to a broker or a store. It only describes:
//!
//! - **Groundings**: which transport protocol and which serialization formats a
//!   pipeline element's output stream uses ([`grounding`])
//! - **Topics**: broker-side topic settings derived from a grounding ([`topic`])
//! - **Data lake**: retention policies, measurements and the operator-facing
//!   configuration of the time-series store ([`datalake`])
//! - **Values**: the field values carried by runtime events ([`value`])
//!
//! ## Quick Start
//!
//! ```rust
//! use tidewire_core::grounding::{EventGrounding, FormatId, KafkaTransport, TransportProtocol};
//!
//! let protocol = TransportProtocol::Kafka(KafkaTransport::new("kafka", 9092, "sp:stream:42"));
//! let grounding = EventGrounding::new(protocol, vec![FormatId::json()]).unwrap();
//!
//! assert_eq!(grounding.transport_protocol.broker_address(), "kafka:9092");
//! ```

pub mod datalake;
pub mod grounding;
pub mod topic;
pub mod value;

pub use datalake::{
    DataLakeConfiguration, DataLakeMeasure, EventProperty, EventSchema, RetentionDuration,
    RetentionPolicy,
};
pub use grounding::{
    EventGrounding, FormatId, GroundingError, JmsTransport, KafkaTransport, MqttTransport,
    ProducerState, ProtocolKind, SaslCredentials, TransportProtocol,
};
pub use topic::{TopicConfig, DEFAULT_RETENTION_MS};
pub use value::Value;
