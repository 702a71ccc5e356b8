//! Data lake metadata: retention policies, measurements, operator configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Retention duration in the store's literal syntax (`1d`, `0s`, `168h0m0s`).
///
/// `0s` means "keep forever" when used with a policy definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetentionDuration(String);

impl RetentionDuration {
    pub fn new(literal: impl Into<String>) -> Self {
        Self(literal.into())
    }

    pub fn infinite() -> Self {
        Self::new("0s")
    }

    pub fn one_day() -> Self {
        Self::new("1d")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when every numeric component of the literal is zero.
    pub fn is_infinite(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .filter(|c| c.is_ascii_digit())
                .all(|c| c == '0')
    }
}

impl fmt::Display for RetentionDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named retention policy of the time-series store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    pub name: String,
    pub duration: RetentionDuration,
    pub is_default: bool,
}

impl RetentionPolicy {
    pub fn new(name: &str, duration: RetentionDuration, is_default: bool) -> Self {
        Self {
            name: name.to_string(),
            duration,
            is_default,
        }
    }
}

/// A single property of an event schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventProperty {
    pub runtime_name: String,
    pub runtime_type: String,
}

impl EventProperty {
    pub fn new(runtime_name: &str, runtime_type: &str) -> Self {
        Self {
            runtime_name: runtime_name.to_string(),
            runtime_type: runtime_type.to_string(),
        }
    }
}

/// Schema of the events stored in a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSchema {
    pub event_properties: Vec<EventProperty>,
}

impl EventSchema {
    pub fn new(event_properties: Vec<EventProperty>) -> Self {
        Self { event_properties }
    }
}

/// Metadata of a measurement persisted in the data lake.
///
/// Created when a pipeline starts persisting events, updated when that
/// pipeline changes run state. Stopping a pipeline does not remove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLakeMeasure {
    pub measure_name: String,
    pub event_schema: EventSchema,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub pipeline_name: Option<String>,
    #[serde(default)]
    pub pipeline_is_running: bool,
}

impl DataLakeMeasure {
    pub fn new(measure_name: &str, event_schema: EventSchema) -> Self {
        Self {
            measure_name: measure_name.to_string(),
            event_schema,
            pipeline_id: None,
            pipeline_name: None,
            pipeline_is_running: false,
        }
    }

    pub fn with_pipeline(mut self, pipeline_id: &str, pipeline_name: &str) -> Self {
        self.pipeline_id = Some(pipeline_id.to_string());
        self.pipeline_name = Some(pipeline_name.to_string());
        self
    }
}

/// Operator-facing view of the data lake settings.
///
/// `batch_size` and `flush_duration` are accepted on write but are not yet
/// applied to the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataLakeConfiguration {
    pub retention_policies: Vec<RetentionPolicy>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub flush_duration: Option<u32>,
}

impl DataLakeConfiguration {
    pub fn from_policies(retention_policies: Vec<RetentionPolicy>) -> Self {
        Self {
            retention_policies,
            batch_size: None,
            flush_duration: None,
        }
    }

    pub fn default_policy(&self) -> Option<&RetentionPolicy> {
        self.retention_policies.iter().find(|p| p.is_default)
    }
}
