//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the edge adapter daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edge_adapter::{northbound_payload, DataPoint, PollingContext, RuntimeEvent};
use edge_common::config::{AppConfig, LoadedAppConfig};
use edge_common::logging::init_tracing;
use edge_metrics::{new_registry, spawn_http_server, MetricsNamespace, RuntimeMetrics};
use edge_runtime::{AdapterRuntimeRegistry, FnConsumer, RuntimeServices, TagConsumer};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("edged ", env!("CARGO_PKG_VERSION")),
    about = "Edge protocol adapter daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run every configured adapter until ctrl-c")]
    Run,
    #[command(about = "Validate the configuration and print the adapter table")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/edged.toml"));
    candidates.push(PathBuf::from("/etc/edged/edged.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(loaded).await,
        Commands::CheckConfig => {
            print_adapter_table(&loaded);
            Ok(())
        }
    }
}

async fn run_daemon(loaded: LoadedAppConfig) -> Result<()> {
    let LoadedAppConfig { config, source } = loaded;
    init_tracing("edged", &config.logging)?;
    info!(config_path = %source.display(), adapters = config.adapters.len(), "configuration loaded");

    let metrics_registry = new_registry();
    let runtime_metrics = RuntimeMetrics::new(metrics_registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(metrics_registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let services = RuntimeServices::new(
        &config.runtime,
        metrics_registry,
        MetricsNamespace::new(config.metrics.prefix.clone()),
        Some(runtime_metrics),
    );
    let registry = Arc::new(AdapterRuntimeRegistry::new(services));
    for (adapter_id, adapter) in &config.adapters {
        let wrapper = registry
            .add_configured(adapter_id, adapter)
            .with_context(|| format!("failed to register adapter '{}'", adapter_id))?;
        for context in wrapper.polling_contexts() {
            registry.tags().add_consumer(publishing_consumer(adapter_id, context));
        }
    }

    let event_task = {
        let mut events = registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(RuntimeEvent::PollingRemoved { adapter_id, tag, consecutive_errors }) => {
                        warn!(adapter_id = %adapter_id, tag = %tag, consecutive_errors, "polling job removed");
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "runtime event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    for (adapter_id, started) in registry.start_all().await {
        if !started {
            error!(adapter_id = %adapter_id, "adapter failed to start");
        }
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    for (adapter_id, stopped) in registry.stop_all(true).await {
        if !stopped {
            warn!(adapter_id = %adapter_id, "adapter did not stop cleanly");
        }
    }
    event_task.abort();

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Consumer that shapes every delivery into its northbound payload and logs
/// it. Stands in for a broker publisher.
fn publishing_consumer(adapter_id: &str, context: &PollingContext) -> Arc<dyn TagConsumer> {
    let adapter_id = adapter_id.to_owned();
    let context = context.clone();
    FnConsumer::new(context.tag().to_owned(), move |_tag: &str, timestamp_ms: i64, points: &[DataPoint]| {
        let payload = northbound_payload(&context, timestamp_ms, points);
        info!(
            adapter_id = %adapter_id,
            destination = %context.destination(),
            qos = context.qos(),
            payload = %payload,
            "publish"
        );
    })
}

fn print_adapter_table(loaded: &LoadedAppConfig) {
    println!("Configuration: {}", loaded.source.display());
    println!(
        "{:<24} {:<12} {:<10} {:>8}",
        "ADAPTER", "TYPE", "AUTOSTART", "POLLING"
    );
    for (adapter_id, adapter) in &loaded.config.adapters {
        println!(
            "{:<24} {:<12} {:<10} {:>8}",
            adapter_id,
            adapter.adapter_type,
            adapter.autostart,
            adapter.polling.len()
        );
        for polling in &adapter.polling {
            println!(
                "  - {} every {}ms (delay {}..{}ms, max errors {})",
                polling.tag,
                polling.interval.as_millis(),
                polling.min_delay_ms,
                polling.max_delay_ms,
                polling.max_polling_errors_before_removal
            );
        }
    }
}
