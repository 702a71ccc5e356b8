//! In-process broker for tests and dry runs
//!
//! Accepts channels for every protocol and topic-creation requests, and
//! records what it sees. Failure knobs let tests drive the error paths of
//! producers and the provisioner.

use super::{ChannelConnector, OutboundChannel, ProducerError};
use crate::provision::{ProvisionError, TopicAdmin, TopicCreation};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tidewire_core::{KafkaTransport, ProtocolKind, TopicConfig, TransportProtocol};

/// A payload accepted by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub kind: ProtocolKind,
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct BrokerState {
    topics: IndexMap<String, TopicConfig>,
    creation_requests: usize,
    messages: Vec<PublishedMessage>,
    open_channels: usize,
    refused: Vec<ProtocolKind>,
    topic_failure: Option<String>,
    stall_topics: bool,
    stall_connections: bool,
}

/// Shared handle to an in-process broker. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every new channel for `kind`.
    pub fn refuse_connections(&self, kind: ProtocolKind) {
        self.lock().refused.push(kind);
    }

    /// Never complete channel opening.
    pub fn stall_connections(&self, stall: bool) {
        self.lock().stall_connections = stall;
    }

    /// Reject every topic-creation request with `reason`.
    pub fn fail_topic_creation(&self, reason: &str) {
        self.lock().topic_failure = Some(reason.to_string());
    }

    /// Never acknowledge topic creation.
    pub fn stall_topic_creation(&self, stall: bool) {
        self.lock().stall_topics = stall;
    }

    pub fn topic(&self, name: &str) -> Option<TopicConfig> {
        self.lock().topics.get(name).cloned()
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.lock().topics.keys().cloned().collect()
    }

    pub fn creation_requests(&self) -> usize {
        self.lock().creation_requests
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.lock().messages.clone()
    }

    /// Payloads published to `topic`, in arrival order.
    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn open_channels(&self) -> usize {
        self.lock().open_channels
    }
}

#[async_trait]
impl ChannelConnector for MemoryBroker {
    async fn open(
        &self,
        protocol: &TransportProtocol,
    ) -> Result<Box<dyn OutboundChannel>, ProducerError> {
        let kind = protocol.kind();
        let (stall, refused) = {
            let state = self.lock();
            (state.stall_connections, state.refused.contains(&kind))
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if refused {
            return Err(ProducerError::ConnectFailed(format!(
                "connection refused by {}",
                protocol.broker_address()
            )));
        }

        self.lock().open_channels += 1;
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            kind,
            topic: protocol.topic_name().to_string(),
            open: true,
        }))
    }
}

#[async_trait]
impl TopicAdmin for MemoryBroker {
    async fn create_topic(
        &self,
        _broker: &KafkaTransport,
        topic: &TopicConfig,
    ) -> Result<TopicCreation, ProvisionError> {
        let (stall, failure) = {
            let mut state = self.lock();
            state.creation_requests += 1;
            (state.stall_topics, state.topic_failure.clone())
        };
        if stall {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = failure {
            return Err(ProvisionError::Rejected {
                topic: topic.name.clone(),
                reason,
            });
        }

        let mut state = self.lock();
        if state.topics.contains_key(&topic.name) {
            return Ok(TopicCreation::AlreadyExisted);
        }
        state.topics.insert(topic.name.clone(), topic.clone());
        Ok(TopicCreation::Created)
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    kind: ProtocolKind,
    topic: String,
    open: bool,
}

#[async_trait]
impl OutboundChannel for MemoryChannel {
    async fn send(&mut self, payload: &[u8]) -> Result<(), ProducerError> {
        if !self.open {
            return Err(ProducerError::NotConnected);
        }
        self.broker.lock().messages.push(PublishedMessage {
            kind: self.kind,
            topic: self.topic.clone(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProducerError> {
        if self.open {
            self.open = false;
            let mut state = self.broker.lock();
            state.open_channels = state.open_channels.saturating_sub(1);
        }
        Ok(())
    }
}
