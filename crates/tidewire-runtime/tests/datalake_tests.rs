//! Retention policy and measurement management against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tidewire_core::{
    DataLakeConfiguration, DataLakeMeasure, EventProperty, EventSchema, RetentionDuration,
    RetentionPolicy,
};
use tidewire_runtime::{
    DataLakeManager, MeasureCatalog, MemoryMeasureCatalog, MemoryTimeSeriesStore, QueryResult,
    RetentionError, StoreError, TimeSeriesStore,
};

fn measure(name: &str) -> DataLakeMeasure {
    DataLakeMeasure::new(
        name,
        EventSchema::new(vec![EventProperty::new("value", "float")]),
    )
    .with_pipeline("pipeline-1", "Plant monitoring")
}

type Fixture = (Arc<MemoryTimeSeriesStore>, Arc<MemoryMeasureCatalog>, DataLakeManager);

fn setup(measures: &[&str]) -> Fixture {
    let store = Arc::new(MemoryTimeSeriesStore::new());
    let catalog = Arc::new(MemoryMeasureCatalog::with_measures(
        measures.iter().map(|name| measure(name)),
    ));
    for name in measures {
        store.add_measurement(name, &["time", "value"], Vec::new());
    }
    let manager = DataLakeManager::new(store.clone(), catalog.clone());
    (store, catalog, manager)
}

/// Store returning canned results, for shapes the in-memory store never produces.
struct ScriptedStore {
    response: QueryResult,
}

#[async_trait]
impl TimeSeriesStore for ScriptedStore {
    async fn execute(&self, _statement: &str) -> Result<QueryResult, StoreError> {
        Ok(self.response.clone())
    }
}

// ===========================================================================
// Retention policies
// ===========================================================================

#[tokio::test]
async fn fresh_store_lists_autogen_only() {
    let (_, _, manager) = setup(&[]);
    let policies = manager.list_policies().await.unwrap();
    assert_eq!(
        policies,
        vec![RetentionPolicy::new("autogen", RetentionDuration::infinite(), true)]
    );
}

#[tokio::test]
async fn reset_with_two_policies_drops_custom_then_defaults_autogen() {
    let (store, _, manager) = setup(&[]);
    manager
        .edit_measurement_configuration(&DataLakeConfiguration::default(), false)
        .await
        .unwrap();
    assert_eq!(manager.list_policies().await.unwrap().len(), 2);

    let before = store.journal().len();
    let confirmation = manager
        .edit_measurement_configuration(&DataLakeConfiguration::default(), true)
        .await
        .unwrap();

    let issued: Vec<String> = store.journal()[before..]
        .iter()
        .filter(|s| !s.starts_with("SHOW"))
        .cloned()
        .collect();
    assert_eq!(
        issued,
        vec![
            "DROP RETENTION POLICY custom ON sp".to_string(),
            "ALTER RETENTION POLICY autogen ON sp DURATION 0s REPLICATION 1 DEFAULT".to_string(),
        ]
    );
    assert_eq!(confirmation, QueryResult::empty().confirmation().unwrap());

    let policies = manager.list_policies().await.unwrap();
    assert_eq!(policies.len(), 1);
    assert!(policies[0].is_default);
    assert!(policies[0].duration.is_infinite());
}

#[tokio::test]
async fn at_most_one_default_after_every_edit() {
    let (_, _, manager) = setup(&[]);
    for reset in [false, false, true, false, true, true] {
        manager
            .edit_measurement_configuration(&DataLakeConfiguration::default(), reset)
            .await
            .unwrap();
        let defaults = manager
            .list_policies()
            .await
            .unwrap()
            .iter()
            .filter(|p| p.is_default)
            .count();
        assert_eq!(defaults, 1);
    }
}

#[tokio::test]
async fn batch_settings_do_not_change_the_command() {
    let (store, _, manager) = setup(&[]);
    let config = DataLakeConfiguration {
        retention_policies: Vec::new(),
        batch_size: Some(500),
        flush_duration: Some(1000),
    };
    manager
        .edit_measurement_configuration(&config, false)
        .await
        .unwrap();

    let create = "CREATE RETENTION POLICY custom ON sp DURATION 1d REPLICATION 1 DEFAULT";
    assert!(store.journal().iter().any(|statement| statement == create));
}

#[tokio::test]
async fn store_error_text_is_surfaced_verbatim() {
    let store = Arc::new(ScriptedStore {
        response: QueryResult::statement_error("retention policy duration must be at least 1h0m0s"),
    });
    let manager = DataLakeManager::new(store, Arc::new(MemoryMeasureCatalog::new()));

    match manager.list_policies().await {
        Err(RetentionError::Rejected(text)) => {
            assert_eq!(text, "retention policy duration must be at least 1h0m0s")
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
}

#[tokio::test]
async fn configuration_reflects_store_state() {
    let (_, _, manager) = setup(&[]);
    manager
        .edit_measurement_configuration(&DataLakeConfiguration::default(), false)
        .await
        .unwrap();

    let config = manager.get_data_lake_configuration().await.unwrap();
    assert_eq!(config.default_policy().map(|p| p.name.as_str()), Some("custom"));
    assert_eq!(
        config.default_policy().map(|p| p.duration.clone()),
        Some(RetentionDuration::one_day())
    );
    assert_eq!(config.batch_size, None);
}

// ===========================================================================
// Measurements
// ===========================================================================

#[tokio::test]
async fn remove_all_stops_at_first_failure() {
    let (store, catalog, manager) = setup(&["m1", "m2", "m3"]);
    store.fail_drop("m2");

    assert!(!manager.remove_all_measurements().await);

    let drops: Vec<String> = store
        .journal()
        .into_iter()
        .filter(|s| s.starts_with("DROP MEASUREMENT"))
        .collect();
    assert_eq!(drops, vec!["DROP MEASUREMENT m1", "DROP MEASUREMENT m2"]);
    assert_eq!(store.measurement_names(), vec!["m2", "m3"]);

    let remaining: Vec<String> = catalog
        .all()
        .unwrap()
        .into_iter()
        .map(|m| m.measure_name)
        .collect();
    assert_eq!(remaining, vec!["m2", "m3"]);
}

#[tokio::test]
async fn remove_all_succeeds_when_every_drop_succeeds() {
    let (store, _, manager) = setup(&["m1", "m2"]);

    assert!(manager.remove_all_measurements().await);
    assert!(store.measurement_names().is_empty());
    assert!(manager.get_all_measurements().await.unwrap().is_empty());
}

#[tokio::test]
async fn stopped_pipeline_keeps_its_measurements() {
    let (_, catalog, manager) = setup(&["m1"]);
    catalog.set_pipeline_running("pipeline-1", true).unwrap();
    catalog.set_pipeline_running("pipeline-1", false).unwrap();

    let measures = manager.get_all_measurements().await.unwrap();
    assert_eq!(measures.len(), 1);
    assert!(!measures[0].pipeline_is_running);
}

#[tokio::test]
async fn events_from_now_returns_recent_rows_in_time_order() {
    let (store, _, manager) = setup(&[]);
    let now = Utc::now();
    let rows = vec![
        vec![json!((now - Duration::minutes(2)).to_rfc3339()), json!(3.0)],
        vec![json!((now - Duration::days(3)).to_rfc3339()), json!(1.0)],
        vec![json!((now - Duration::minutes(5)).to_rfc3339()), json!(2.0)],
    ];
    store.add_measurement("flowrate", &["time", "value"], rows);

    let events = manager.events_from_now("flowrate", 1, "h").await.unwrap();

    let values: Vec<f64> = events
        .iter()
        .filter_map(|row| row["value"].as_f64())
        .collect();
    assert_eq!(values, vec![2.0, 3.0]);
    assert!(store
        .journal()
        .contains(&"SELECT * FROM flowrate WHERE time > now() - 1h ORDER BY time".to_string()));
}
