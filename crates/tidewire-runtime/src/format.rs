//! Wire formats for outbound events
//!
//! An element's grounding lists the formats it can emit, most preferred
//! first. The registry picks the first one this process knows how to encode.
//! - **json**: always available, the flat field map as a JSON object.
//! - **msgpack**: MessagePack with named fields, enabled via the `binary-codec` feature.

use crate::event::{Event, Fields};
use indexmap::IndexMap;
use std::sync::Arc;
use tidewire_core::{FormatId, Value};

/// Errors raised while selecting or applying a wire format.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("None of the transport formats {0:?} is supported")]
    Unsupported(Vec<String>),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),
}

/// Serializer between events and broker payloads.
pub trait DataFormat: Send + Sync {
    /// Short id this format registers under.
    fn id(&self) -> FormatId;

    fn to_bytes(&self, event: &Event) -> Result<Vec<u8>, FormatError>;

    fn from_bytes(&self, payload: &[u8]) -> Result<Event, FormatError>;
}

/// JSON object of the event's fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormat;

impl DataFormat for JsonFormat {
    fn id(&self) -> FormatId {
        FormatId::json()
    }

    fn to_bytes(&self, event: &Event) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::with_capacity(256);
        serde_json::to_writer(&mut buf, &event.fields)
            .map_err(|e| FormatError::Encode(e.to_string()))?;
        Ok(buf)
    }

    fn from_bytes(&self, payload: &[u8]) -> Result<Event, FormatError> {
        let json: serde_json::Value =
            serde_json::from_slice(payload).map_err(|e| FormatError::Decode(e.to_string()))?;
        let obj = json
            .as_object()
            .ok_or_else(|| FormatError::Decode("payload is not a JSON object".to_string()))?;
        let mut fields = Fields::with_capacity_and_hasher(obj.len(), Default::default());
        for (key, value) in obj {
            fields.insert(key.clone(), Value::from_json(value));
        }
        Ok(Event::decoded(fields))
    }
}

/// MessagePack map of the event's fields.
#[cfg(feature = "binary-codec")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackFormat;

#[cfg(feature = "binary-codec")]
impl DataFormat for MessagePackFormat {
    fn id(&self) -> FormatId {
        FormatId::msgpack()
    }

    fn to_bytes(&self, event: &Event) -> Result<Vec<u8>, FormatError> {
        rmp_serde::to_vec_named(&event.fields).map_err(|e| FormatError::Encode(e.to_string()))
    }

    fn from_bytes(&self, payload: &[u8]) -> Result<Event, FormatError> {
        let fields: Fields =
            rmp_serde::from_slice(payload).map_err(|e| FormatError::Decode(e.to_string()))?;
        Ok(Event::decoded(fields))
    }
}

/// Formats known to this process, keyed by short id.
#[derive(Clone)]
pub struct FormatRegistry {
    formats: IndexMap<String, Arc<dyn DataFormat>>,
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            formats: IndexMap::new(),
        }
    }

    /// Registry with every format compiled into this build.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(JsonFormat));
        #[cfg(feature = "binary-codec")]
        registry.register(Arc::new(MessagePackFormat));
        registry
    }

    pub fn register(&mut self, format: Arc<dyn DataFormat>) {
        self.formats.insert(format.id().short_name(), format);
    }

    pub fn supports(&self, id: &FormatId) -> bool {
        self.formats.contains_key(&id.short_name())
    }

    pub fn get(&self, id: &FormatId) -> Option<Arc<dyn DataFormat>> {
        self.formats.get(&id.short_name()).cloned()
    }

    /// First supported format of `preferred`, in order.
    pub fn resolve(&self, preferred: &[FormatId]) -> Result<Arc<dyn DataFormat>, FormatError> {
        preferred
            .iter()
            .find_map(|id| self.get(id))
            .ok_or_else(|| {
                FormatError::Unsupported(preferred.iter().map(|id| id.to_string()).collect())
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.formats.keys().map(String::as_str)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
