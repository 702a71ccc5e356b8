//! Tidewire CLI - operator commands for the transport binding layer

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use tidewire_cli::config::Config;
use tidewire_cli::{
    data_lake, format_policies, format_rows, init_logging, kafka_descriptor, sync_catalog,
};
use tidewire_runtime::provision::TopicCreation;
use tidewire_runtime::ProducerFactory;

#[derive(Parser)]
#[command(name = "tidewire")]
#[command(author = "Tidewire Contributors")]
#[command(version)]
#[command(
    about = "Tidewire - transport and retention management for event pipelines",
    long_about = None
)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, global = true, env = "TIDEWIRE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or change the data lake retention policies
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },

    /// Inspect or remove data lake measurements
    Measurements {
        #[command(subcommand)]
        action: MeasurementsAction,
    },

    /// Print the events of a measurement newer than a time window
    Events {
        /// Measurement name
        #[arg(short, long)]
        measure: String,

        /// Window length
        #[arg(short, long)]
        value: u64,

        /// Window unit (ns, u, ms, s, m, h, d, w)
        #[arg(short, long, default_value = "m")]
        unit: String,
    },

    /// Ensure a Kafka topic exists with the platform retention
    Provision {
        /// Broker address (host:port)
        #[arg(short, long)]
        broker: String,

        /// Topic name
        #[arg(short, long)]
        topic: String,

        /// Retention override in milliseconds
        #[arg(long)]
        retention_ms: Option<u64>,
    },

    /// Generate example configuration file
    ConfigGen {
        /// Output format (yaml, toml)
        #[arg(short, long, default_value = "yaml")]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RetentionAction {
    /// List the retention policies of the database
    List,

    /// Create or alter the custom policy, or reset to the infinite default
    Edit {
        /// Drop the custom policy and make autogen the default again
        #[arg(long)]
        reset: bool,

        /// Write batch size (recorded, not applied)
        #[arg(long)]
        batch_size: Option<u32>,

        /// Flush duration in milliseconds (recorded, not applied)
        #[arg(long)]
        flush_duration: Option<u32>,
    },
}

#[derive(Subcommand)]
enum MeasurementsAction {
    /// List the measurements present in the store
    List,

    /// Remove every measurement, stopping at the first failure
    Purge,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Retention { action } => {
            let manager = data_lake(&config)?;
            match action {
                RetentionAction::List => {
                    let policies = manager.list_policies().await?;
                    print!("{}", format_policies(&policies));
                }
                RetentionAction::Edit {
                    reset,
                    batch_size,
                    flush_duration,
                } => {
                    let mut edit = manager.get_data_lake_configuration().await?;
                    edit.batch_size = batch_size;
                    edit.flush_duration = flush_duration;
                    let confirmation = manager
                        .edit_measurement_configuration(&edit, reset)
                        .await?;
                    println!("{}", confirmation);
                }
            }
        }

        Commands::Measurements { action } => {
            let manager = data_lake(&config)?;
            match action {
                MeasurementsAction::List => {
                    for name in manager.discover_measurements().await? {
                        println!("{}", name);
                    }
                }
                MeasurementsAction::Purge => {
                    let found = sync_catalog(&manager).await?;
                    info!("Purging {} measurements from {}", found, manager.database());
                    if !manager.remove_all_measurements().await {
                        let left = manager.get_all_measurements().await?.len();
                        anyhow::bail!(
                            "Purge stopped at the first failure, {} measurements left",
                            left
                        );
                    }
                    println!("Removed {} measurements", found);
                }
            }
        }

        Commands::Events {
            measure,
            value,
            unit,
        } => {
            let manager = data_lake(&config)?;
            let rows = manager.events_from_now(&measure, value, &unit).await?;
            print!("{}", format_rows(&rows)?);
        }

        Commands::Provision {
            broker,
            topic,
            retention_ms,
        } => {
            let kafka = kafka_descriptor(&broker, &topic, retention_ms)?;
            let factory = ProducerFactory::from_settings(config.transport.clone());
            let topic_config = factory.provisioner().topic_config(&kafka);
            match factory.provisioner().ensure_topic(&kafka).await? {
                TopicCreation::Created => println!(
                    "Created topic {} (retention.ms={})",
                    topic_config.name, topic_config.retention_ms
                ),
                TopicCreation::AlreadyExisted => {
                    println!("Topic {} already exists", topic_config.name)
                }
            }
        }

        Commands::ConfigGen { format, output } => {
            let content = match format.as_str() {
                "yaml" | "yml" => Config::example_yaml(),
                "toml" => Config::example_toml(),
                _ => anyhow::bail!("Unsupported format: {}. Use 'yaml' or 'toml'", format),
            };

            if let Some(path) = output {
                std::fs::write(&path, &content)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", content);
            }
        }
    }

    Ok(())
}
