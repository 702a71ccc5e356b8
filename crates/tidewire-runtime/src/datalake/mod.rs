//! Data lake management
//!
//! [`DataLakeManager`] mediates retention policy changes and measurement
//! removal against a [`TimeSeriesStore`]. The store stays the source of truth:
//! nothing read from it is cached, and no application-level lock serializes
//! concurrent edits.

mod catalog;
mod influx;
pub mod query;
mod store;

pub use catalog::{CatalogError, MeasureCatalog, MemoryMeasureCatalog};
pub use influx::{InfluxConfig, InfluxStore};
pub use query::{EventsFromNow, QueryError, RetentionOp, RetentionPolicyCommand};
pub use store::{
    MemoryTimeSeriesStore, QueryResult, Series, StatementResult, StoreError, TimeSeriesStore,
};

use indexmap::IndexMap;
use query::{AUTOGEN_POLICY, CUSTOM_POLICY, DEFAULT_DATABASE};
use std::sync::Arc;
use tidewire_core::{DataLakeConfiguration, DataLakeMeasure, RetentionDuration, RetentionPolicy};
use tracing::{debug, info, warn};

/// Errors raised by data lake operations.
#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    /// The store refused the statement; carries its error text verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Unexpected store response: {0}")]
    Decode(String),
}

/// A row of a query result.
pub type Row = IndexMap<String, serde_json::Value>;

/// Retention and measurement management over one database.
#[derive(Clone)]
pub struct DataLakeManager {
    store: Arc<dyn TimeSeriesStore>,
    catalog: Arc<dyn MeasureCatalog>,
    database: String,
}

impl DataLakeManager {
    pub fn new(store: Arc<dyn TimeSeriesStore>, catalog: Arc<dyn MeasureCatalog>) -> Self {
        Self {
            store,
            catalog,
            database: DEFAULT_DATABASE.to_string(),
        }
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn catalog(&self) -> &Arc<dyn MeasureCatalog> {
        &self.catalog
    }

    async fn execute(&self, statement: &str) -> Result<QueryResult, RetentionError> {
        debug!("Data lake statement: {}", statement);
        Ok(self.store.execute(statement).await?)
    }

    /// Execute and turn a refused statement into [`RetentionError::Rejected`].
    async fn execute_checked(&self, statement: &str) -> Result<QueryResult, RetentionError> {
        let result = self.execute(statement).await?;
        match result.first_error() {
            Some(error) => Err(RetentionError::Rejected(error.to_string())),
            None => Ok(result),
        }
    }

    /// Current retention policies, read from the store on every call.
    pub async fn list_policies(&self) -> Result<Vec<RetentionPolicy>, RetentionError> {
        let result = self
            .execute_checked(&query::show_retention_policies(&self.database))
            .await?;
        result.rows().iter().map(policy_from_row).collect()
    }

    pub async fn get_data_lake_configuration(
        &self,
    ) -> Result<DataLakeConfiguration, RetentionError> {
        Ok(DataLakeConfiguration::from_policies(
            self.list_policies().await?,
        ))
    }

    /// Apply an operator edit and return the store's confirmation.
    ///
    /// With `reset_to_default` the `custom` policy is dropped (when more than
    /// one policy exists) and `autogen` is made the infinite default. The two
    /// statements are sequential, not atomic; a failed drop stops the reset.
    /// Otherwise `custom` is created, or altered when more than one policy
    /// exists, with a one-day duration.
    ///
    /// `batch_size` and `flush_duration` of `config` are not applied.
    pub async fn edit_measurement_configuration(
        &self,
        config: &DataLakeConfiguration,
        reset_to_default: bool,
    ) -> Result<String, RetentionError> {
        let existing = self.list_policies().await?.len();
        debug!(
            "Editing retention on {} ({} policies, requested {})",
            self.database,
            existing,
            config.retention_policies.len()
        );

        let command = if reset_to_default {
            if existing > 1 {
                let drop = RetentionPolicyCommand::new(
                    RetentionOp::Drop,
                    CUSTOM_POLICY,
                    RetentionDuration::infinite(),
                );
                self.execute_checked(&drop.to_influxql(&self.database))
                    .await?;
            }
            RetentionPolicyCommand::new(
                RetentionOp::Default,
                AUTOGEN_POLICY,
                RetentionDuration::infinite(),
            )
        } else {
            let op = if existing > 1 {
                RetentionOp::Alter
            } else {
                RetentionOp::Create
            };
            RetentionPolicyCommand::new(op, CUSTOM_POLICY, RetentionDuration::one_day())
        };

        let result = self
            .execute_checked(&command.to_influxql(&self.database))
            .await?;
        info!(
            "Retention policy {} {} applied on {}",
            command.op, command.name, self.database
        );
        Ok(result.confirmation()?)
    }

    /// Measurements known to the catalog.
    pub async fn get_all_measurements(&self) -> Result<Vec<DataLakeMeasure>, RetentionError> {
        Ok(self.catalog.all()?)
    }

    /// Measurement names present in the store, catalogued or not.
    pub async fn discover_measurements(&self) -> Result<Vec<String>, RetentionError> {
        let result = self
            .execute_checked(&query::show_measurements(&self.database))
            .await?;
        result
            .rows()
            .iter()
            .map(|row| {
                row.get("name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| RetentionError::Decode("measurement row without name".into()))
            })
            .collect()
    }

    /// Delete every catalogued measurement, in catalog order.
    ///
    /// Stops at the first measurement that fails to delete and returns false;
    /// measurements before it stay deleted and those after it are not touched.
    pub async fn remove_all_measurements(&self) -> bool {
        let measures = match self.catalog.all() {
            Ok(measures) => measures,
            Err(e) => {
                warn!("Cannot list measurements: {}", e);
                return false;
            }
        };

        for measure in &measures {
            let name = &measure.measure_name;
            if let Err(e) = self.execute_checked(&query::drop_measurement(name)).await {
                warn!("Failed to remove measurement {}: {}", name, e);
                return false;
            }
            if let Err(e) = self.catalog.remove(name) {
                warn!("Measurement {} dropped but still catalogued: {}", name, e);
                return false;
            }
            info!("Removed measurement {}", name);
        }
        true
    }

    /// Events of `measure` newer than `value` `unit`s, oldest first.
    pub async fn events_from_now(
        &self,
        measure: &str,
        value: u64,
        unit: &str,
    ) -> Result<Vec<Row>, RetentionError> {
        let query = EventsFromNow::new(measure, value, unit)?;
        let result = self.execute_checked(&query.to_influxql()).await?;
        Ok(result.rows())
    }
}

fn policy_from_row(row: &Row) -> Result<RetentionPolicy, RetentionError> {
    let field = |key: &str| {
        row.get(key)
            .ok_or_else(|| RetentionError::Decode(format!("policy row without {:?}", key)))
    };
    let name = field("name")?
        .as_str()
        .ok_or_else(|| RetentionError::Decode("policy name is not a string".into()))?;
    let duration = field("duration")?
        .as_str()
        .ok_or_else(|| RetentionError::Decode("policy duration is not a string".into()))?;
    let is_default = field("default")?
        .as_bool()
        .ok_or_else(|| RetentionError::Decode("policy default flag is not a bool".into()))?;
    Ok(RetentionPolicy::new(
        name,
        RetentionDuration::new(duration),
        is_default,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager(store: Arc<MemoryTimeSeriesStore>) -> DataLakeManager {
        DataLakeManager::new(store, Arc::new(MemoryMeasureCatalog::new()))
    }

    #[test]
    fn test_policy_from_row() {
        let row: Row = [
            ("name".to_string(), json!("autogen")),
            ("duration".to_string(), json!("0s")),
            ("default".to_string(), json!(true)),
        ]
        .into_iter()
        .collect();
        let policy = policy_from_row(&row).unwrap();
        assert_eq!(policy.name, "autogen");
        assert!(policy.duration.is_infinite());
        assert!(policy.is_default);

        let mut broken = row.clone();
        broken.shift_remove("default");
        assert!(matches!(
            policy_from_row(&broken),
            Err(RetentionError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_create_then_alter() {
        let store = Arc::new(MemoryTimeSeriesStore::new());
        let manager = manager(store.clone());
        let config = DataLakeConfiguration::default();

        manager
            .edit_measurement_configuration(&config, false)
            .await
            .unwrap();
        manager
            .edit_measurement_configuration(&config, false)
            .await
            .unwrap();

        let journal = store.journal();
        assert!(journal[1].starts_with("CREATE RETENTION POLICY custom"));
        assert!(journal[3].starts_with("ALTER RETENTION POLICY custom"));

        let configuration = manager.get_data_lake_configuration().await.unwrap();
        assert_eq!(configuration.retention_policies.len(), 2);
        assert_eq!(
            configuration.default_policy().map(|p| p.name.as_str()),
            Some("custom")
        );
    }

    #[tokio::test]
    async fn test_reset_with_single_policy_skips_drop() {
        let store = Arc::new(MemoryTimeSeriesStore::new());
        let manager = manager(store.clone());

        manager
            .edit_measurement_configuration(&DataLakeConfiguration::default(), true)
            .await
            .unwrap();

        let journal = store.journal();
        assert_eq!(journal.len(), 2);
        assert_eq!(
            journal[1],
            "ALTER RETENTION POLICY autogen ON sp DURATION 0s REPLICATION 1 DEFAULT"
        );
    }

    #[tokio::test]
    async fn test_events_from_now_rejects_bad_unit_without_query() {
        let store = Arc::new(MemoryTimeSeriesStore::new());
        let manager = manager(store.clone());

        let result = manager.events_from_now("flowrate", 5, "years").await;
        assert!(matches!(
            result,
            Err(RetentionError::Query(QueryError::InvalidUnit(_)))
        ));
        assert!(store.journal().is_empty());
    }

    #[tokio::test]
    async fn test_discover_measurements() {
        let store = Arc::new(MemoryTimeSeriesStore::new());
        store.add_measurement("flowrate", &["time", "value"], Vec::new());
        store.add_measurement("pressure", &["time", "value"], Vec::new());

        let names = manager(store).discover_measurements().await.unwrap();
        assert_eq!(names, vec!["flowrate", "pressure"]);
    }
}
