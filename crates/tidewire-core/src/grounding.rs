//! Transport groundings: which broker a stream lives on and how it is encoded
//!
//! A grounding is attached to a pipeline element's output stream by the
//! pipeline manager. It is immutable once attached; the runtime only reads it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Zookeeper port assumed when a descriptor does not name one.
pub const DEFAULT_ZOOKEEPER_PORT: u16 = 2181;

/// Errors raised while decoding or validating a grounding description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GroundingError {
    /// The description names a protocol outside the supported set.
    #[error("Unsupported transport protocol: {0}")]
    UnsupportedProtocol(String),

    /// A grounding must list at least one transport format.
    #[error("Grounding declares no transport formats")]
    EmptyFormats,

    /// A `host:port` string could not be split or its port parsed.
    #[error("Invalid broker address: {0}")]
    InvalidAddress(String),

    /// Any other structural problem with the description.
    #[error("Malformed grounding: {0}")]
    Malformed(String),
}

/// Tag of a transport protocol variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Kafka,
    Jms,
    Mqtt,
}

impl ProtocolKind {
    pub const ALL: [ProtocolKind; 3] = [ProtocolKind::Kafka, ProtocolKind::Jms, ProtocolKind::Mqtt];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Kafka => "kafka",
            ProtocolKind::Jms => "jms",
            ProtocolKind::Mqtt => "mqtt",
        }
    }

    /// Look up a tag as it appears in a declarative description.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SASL/PLAIN credentials for a Kafka broker.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

impl SaslCredentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

fn default_zookeeper_port() -> u16 {
    DEFAULT_ZOOKEEPER_PORT
}

/// Kafka transport descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTransport {
    pub broker_hostname: String,
    pub kafka_port: u16,
    pub topic_name: String,
    /// Zookeeper host; empty means "same host as the broker".
    #[serde(default)]
    pub zookeeper_host: String,
    #[serde(default = "default_zookeeper_port")]
    pub zookeeper_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SaslCredentials>,
    /// Explicit topic retention, overriding the platform default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_ms: Option<u64>,
}

impl KafkaTransport {
    pub fn new(broker_hostname: &str, kafka_port: u16, topic_name: &str) -> Self {
        Self {
            broker_hostname: broker_hostname.to_string(),
            kafka_port,
            topic_name: topic_name.to_string(),
            zookeeper_host: broker_hostname.to_string(),
            zookeeper_port: DEFAULT_ZOOKEEPER_PORT,
            credentials: None,
            retention_ms: None,
        }
    }

    /// Build a descriptor from a legacy `host:port` broker URL.
    pub fn from_url(url: &str, topic_name: &str) -> Result<Self, GroundingError> {
        let (host, port) = split_host_port(url)?;
        Ok(Self::new(host, port, topic_name))
    }

    pub fn with_zookeeper(mut self, host: &str, port: u16) -> Self {
        self.zookeeper_host = host.to_string();
        self.zookeeper_port = port;
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some(SaslCredentials::new(username, password));
        self
    }

    pub fn with_retention_ms(mut self, retention_ms: u64) -> Self {
        self.retention_ms = Some(retention_ms);
        self
    }

    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_hostname, self.kafka_port)
    }

    pub fn zookeeper_address(&self) -> String {
        let host = if self.zookeeper_host.is_empty() {
            &self.broker_hostname
        } else {
            &self.zookeeper_host
        };
        format!("{}:{}", host, self.zookeeper_port)
    }
}

/// JMS transport descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmsTransport {
    pub broker_hostname: String,
    pub port: u16,
    pub topic_name: String,
}

impl JmsTransport {
    pub fn new(broker_hostname: &str, port: u16, topic_name: &str) -> Self {
        Self {
            broker_hostname: broker_hostname.to_string(),
            port,
            topic_name: topic_name.to_string(),
        }
    }
}

/// MQTT transport descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttTransport {
    pub broker_hostname: String,
    pub port: u16,
    pub topic_name: String,
}

impl MqttTransport {
    pub fn new(broker_hostname: &str, port: u16, topic_name: &str) -> Self {
        Self {
            broker_hostname: broker_hostname.to_string(),
            port,
            topic_name: topic_name.to_string(),
        }
    }
}

/// Transport protocol attached to a grounding.
///
/// The variant set is closed: code that needs per-protocol behavior matches on
/// this enum exhaustively instead of falling back to a default transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportProtocol {
    Kafka(KafkaTransport),
    Jms(JmsTransport),
    Mqtt(MqttTransport),
}

impl TransportProtocol {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            TransportProtocol::Kafka(_) => ProtocolKind::Kafka,
            TransportProtocol::Jms(_) => ProtocolKind::Jms,
            TransportProtocol::Mqtt(_) => ProtocolKind::Mqtt,
        }
    }

    pub fn broker_hostname(&self) -> &str {
        match self {
            TransportProtocol::Kafka(k) => &k.broker_hostname,
            TransportProtocol::Jms(j) => &j.broker_hostname,
            TransportProtocol::Mqtt(m) => &m.broker_hostname,
        }
    }

    pub fn broker_port(&self) -> u16 {
        match self {
            TransportProtocol::Kafka(k) => k.kafka_port,
            TransportProtocol::Jms(j) => j.port,
            TransportProtocol::Mqtt(m) => m.port,
        }
    }

    pub fn topic_name(&self) -> &str {
        match self {
            TransportProtocol::Kafka(k) => &k.topic_name,
            TransportProtocol::Jms(j) => &j.topic_name,
            TransportProtocol::Mqtt(m) => &m.topic_name,
        }
    }

    /// `host:port` of the broker.
    pub fn broker_address(&self) -> String {
        format!("{}:{}", self.broker_hostname(), self.broker_port())
    }
}

/// Identifier of a serialization format.
///
/// Descriptions may carry either a short id (`json`) or a vocabulary URI whose
/// last `#` or `/` segment is the short id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatId(String);

impl FormatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn json() -> Self {
        Self::new("json")
    }

    pub fn msgpack() -> Self {
        Self::new("msgpack")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short, lower-cased id used for registry lookups.
    pub fn short_name(&self) -> String {
        self.0
            .rsplit(['#', '/'])
            .next()
            .unwrap_or(&self.0)
            .to_ascii_lowercase()
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a transport producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProducerState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Transport protocol plus the ordered list of formats an element can emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "GroundingDocument")]
pub struct EventGrounding {
    pub transport_protocol: TransportProtocol,
    /// Never empty; earlier entries are preferred.
    pub transport_formats: Vec<FormatId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingDocument {
    transport_protocol: TransportProtocol,
    transport_formats: Vec<FormatId>,
}

impl TryFrom<GroundingDocument> for EventGrounding {
    type Error = GroundingError;

    fn try_from(doc: GroundingDocument) -> Result<Self, Self::Error> {
        EventGrounding::new(doc.transport_protocol, doc.transport_formats)
    }
}

impl EventGrounding {
    pub fn new(
        transport_protocol: TransportProtocol,
        transport_formats: Vec<FormatId>,
    ) -> Result<Self, GroundingError> {
        if transport_formats.is_empty() {
            return Err(GroundingError::EmptyFormats);
        }
        Ok(Self {
            transport_protocol,
            transport_formats,
        })
    }

    /// Decode a declarative grounding description.
    ///
    /// Protocol tags match case-insensitively and are rewritten to their
    /// canonical form before decoding. Tags outside the supported set are
    /// reported as [`GroundingError::UnsupportedProtocol`].
    pub fn from_value(mut value: serde_json::Value) -> Result<Self, GroundingError> {
        let tag = value
            .get_mut("transportProtocol")
            .and_then(|p| p.get_mut("type"))
            .ok_or_else(|| {
                GroundingError::Malformed("transportProtocol.type is missing".into())
            })?;
        let kind = match tag.as_str() {
            Some(name) => ProtocolKind::from_tag(name)
                .ok_or_else(|| GroundingError::UnsupportedProtocol(name.to_string()))?,
            None => {
                return Err(GroundingError::Malformed(
                    "transportProtocol.type is not a string".into(),
                ))
            }
        };
        *tag = serde_json::Value::from(kind.as_str());

        let formats_empty = value
            .get("transportFormats")
            .and_then(|f| f.as_array())
            .is_some_and(|f| f.is_empty());
        if formats_empty {
            return Err(GroundingError::EmptyFormats);
        }

        serde_json::from_value(value).map_err(|e| GroundingError::Malformed(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, GroundingError> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| GroundingError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }
}

fn split_host_port(url: &str) -> Result<(&str, u16), GroundingError> {
    let (host, port) = url
        .rsplit_once(':')
        .ok_or_else(|| GroundingError::InvalidAddress(url.to_string()))?;
    if host.is_empty() {
        return Err(GroundingError::InvalidAddress(url.to_string()));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| GroundingError::InvalidAddress(url.to_string()))?;
    Ok((host, port))
}
