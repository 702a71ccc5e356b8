//! Catalog of measurements known to the data lake

use indexmap::IndexMap;
use std::sync::RwLock;
use tidewire_core::DataLakeMeasure;

/// Errors raised by a measure catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog storage error: {0}")]
    Storage(String),
}

/// Measurement metadata storage.
pub trait MeasureCatalog: Send + Sync {
    /// All measurements, in registration order.
    fn all(&self) -> Result<Vec<DataLakeMeasure>, CatalogError>;

    fn get(&self, measure_name: &str) -> Result<Option<DataLakeMeasure>, CatalogError>;

    /// Record a measurement a pipeline started persisting to.
    /// Returns false if the name was already registered (the entry is replaced).
    fn register(&self, measure: DataLakeMeasure) -> Result<bool, CatalogError>;

    /// Update the run state of every measurement owned by `pipeline_id`.
    /// Returns the number of measurements updated.
    fn set_pipeline_running(&self, pipeline_id: &str, running: bool) -> Result<usize, CatalogError>;

    /// Logically delete a measurement.
    fn remove(&self, measure_name: &str) -> Result<bool, CatalogError>;
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryMeasureCatalog {
    measures: RwLock<IndexMap<String, DataLakeMeasure>>,
}

impl MemoryMeasureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_measures(measures: impl IntoIterator<Item = DataLakeMeasure>) -> Self {
        let catalog = Self::new();
        if let Ok(mut map) = catalog.measures.write() {
            for measure in measures {
                map.insert(measure.measure_name.clone(), measure);
            }
        }
        catalog
    }
}

impl MeasureCatalog for MemoryMeasureCatalog {
    fn all(&self) -> Result<Vec<DataLakeMeasure>, CatalogError> {
        let measures = self
            .measures
            .read()
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        Ok(measures.values().cloned().collect())
    }

    fn get(&self, measure_name: &str) -> Result<Option<DataLakeMeasure>, CatalogError> {
        let measures = self
            .measures
            .read()
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        Ok(measures.get(measure_name).cloned())
    }

    fn register(&self, measure: DataLakeMeasure) -> Result<bool, CatalogError> {
        let mut measures = self
            .measures
            .write()
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        Ok(measures
            .insert(measure.measure_name.clone(), measure)
            .is_none())
    }

    fn set_pipeline_running(
        &self,
        pipeline_id: &str,
        running: bool,
    ) -> Result<usize, CatalogError> {
        let mut measures = self
            .measures
            .write()
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        let mut updated = 0;
        for measure in measures.values_mut() {
            if measure.pipeline_id.as_deref() == Some(pipeline_id) {
                measure.pipeline_is_running = running;
                updated += 1;
            }
        }
        Ok(updated)
    }

    fn remove(&self, measure_name: &str) -> Result<bool, CatalogError> {
        let mut measures = self
            .measures
            .write()
            .map_err(|e| CatalogError::Storage(e.to_string()))?;
        Ok(measures.shift_remove(measure_name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidewire_core::{EventProperty, EventSchema};

    fn measure(name: &str, pipeline: &str) -> DataLakeMeasure {
        DataLakeMeasure::new(
            name,
            EventSchema::new(vec![EventProperty::new("value", "float")]),
        )
        .with_pipeline(pipeline, "Pipeline")
    }

    #[test]
    fn test_register_and_order() {
        let catalog = MemoryMeasureCatalog::new();
        assert!(catalog.register(measure("b", "p1")).unwrap());
        assert!(catalog.register(measure("a", "p1")).unwrap());
        assert!(!catalog.register(measure("b", "p2")).unwrap());

        let names: Vec<String> = catalog
            .all()
            .unwrap()
            .into_iter()
            .map(|m| m.measure_name)
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(
            catalog.get("b").unwrap().and_then(|m| m.pipeline_id),
            Some("p2".to_string())
        );
    }

    #[test]
    fn test_pipeline_state_does_not_remove() {
        let catalog =
            MemoryMeasureCatalog::with_measures([measure("m1", "p1"), measure("m2", "p2")]);

        assert_eq!(catalog.set_pipeline_running("p1", true).unwrap(), 1);
        assert!(catalog.get("m1").unwrap().unwrap().pipeline_is_running);

        assert_eq!(catalog.set_pipeline_running("p1", false).unwrap(), 1);
        assert_eq!(catalog.all().unwrap().len(), 2);
    }

    #[test]
    fn test_remove() {
        let catalog = MemoryMeasureCatalog::with_measures([measure("m1", "p1")]);
        assert!(catalog.remove("m1").unwrap());
        assert!(!catalog.remove("m1").unwrap());
        assert!(catalog.all().unwrap().is_empty());
    }
}
