//! Tidewire CLI library - testable functions behind the `tidewire` binary
//!
//! Wires the configuration file into the runtime: logging setup and the data
//! lake manager over InfluxDB, plus the output formatting of each command.

pub mod config;

use anyhow::Result;
use std::sync::Arc;
use tidewire_core::{DataLakeMeasure, EventSchema, KafkaTransport, RetentionPolicy};
use tidewire_runtime::datalake::Row;
use tidewire_runtime::{DataLakeManager, InfluxStore, MeasureCatalog, MemoryMeasureCatalog};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

/// Install the global tracing subscriber. `RUST_LOG` wins over the configured level.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .map_err(|e| anyhow::anyhow!("Invalid log level {:?}: {}", logging.level, e))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = match (logging.format.as_str(), logging.timestamps) {
        ("json", _) => builder.json().try_init(),
        (_, true) => builder.try_init(),
        (_, false) => builder.without_time().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

/// Data lake manager over the configured InfluxDB database.
///
/// The catalog starts empty: the CLI has no access to the platform's document
/// storage. Fill it with [`sync_catalog`].
pub fn data_lake(config: &Config) -> Result<DataLakeManager> {
    let store = InfluxStore::new(config.datalake.clone())?;
    let manager = DataLakeManager::new(Arc::new(store), Arc::new(MemoryMeasureCatalog::new()))
        .with_database(&config.datalake.database);
    Ok(manager)
}

/// Register every store measurement missing from the catalog. Returns how many were added.
pub async fn sync_catalog(manager: &DataLakeManager) -> Result<usize> {
    let mut added = 0;
    for name in manager.discover_measurements().await? {
        if manager.catalog().get(&name)?.is_none() {
            manager
                .catalog()
                .register(DataLakeMeasure::new(&name, EventSchema::default()))?;
            added += 1;
        }
    }
    Ok(added)
}

/// Plain-text policy table.
pub fn format_policies(policies: &[RetentionPolicy]) -> String {
    let width = policies
        .iter()
        .map(|p| p.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let mut out = format!("{:<width$}  {:<10}  DEFAULT\n", "NAME", "DURATION");
    for policy in policies {
        out.push_str(&format!(
            "{:<width$}  {:<10}  {}\n",
            policy.name,
            policy.duration.as_str(),
            if policy.is_default { "*" } else { "" }
        ));
    }
    out
}

/// One JSON object per line.
pub fn format_rows(rows: &[Row]) -> Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

/// Kafka descriptor from a `host:port` broker address.
pub fn kafka_descriptor(
    broker: &str,
    topic: &str,
    retention_ms: Option<u64>,
) -> Result<KafkaTransport> {
    let kafka = KafkaTransport::from_url(broker, topic)?;
    Ok(match retention_ms {
        Some(retention) => kafka.with_retention_ms(retention),
        None => kafka,
    })
}
