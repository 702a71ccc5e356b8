//! Records passed from element logic to an output binding

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use std::sync::Arc;
use tidewire_core::Value;

/// Field map of an event, in insertion order. Only this map goes on the wire.
pub type Fields = IndexMap<String, Value, FxBuildHasher>;

/// Type given to events decoded from a broker payload.
pub const WIRE_EVENT_TYPE: &str = "Event";

/// A record flowing through an execution engine.
///
/// `event_type` and `received_at` stay in process; wire formats only see `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: Arc<str>,
    pub received_at: DateTime<Utc>,
    pub fields: Fields,
}

impl Event {
    pub fn new(event_type: impl Into<Arc<str>>) -> Self {
        Self {
            event_type: event_type.into(),
            received_at: Utc::now(),
            fields: Fields::default(),
        }
    }

    /// Event rebuilt from a payload's field map.
    pub fn decoded(fields: Fields) -> Self {
        Self {
            event_type: Arc::from(WIRE_EVENT_TYPE),
            received_at: Utc::now(),
            fields,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_float)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}
