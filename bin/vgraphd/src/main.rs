//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "binary"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Binary entrypoint for the VisualGraph telemetry daemon."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use vgraph_common::config::{AppConfig, StorageBackend, StorageConfig};
use vgraph_common::logging::init_tracing;
use vgraph_core::{BroadcastHub, GenerationController};
use vgraph_metrics::{new_registry, spawn_http_server, GenerationMetrics, SharedRegistry};
use vgraph_net::{ApiServerBuilder, ApiServerHandle};
use vgraph_storage::{JournalStore, MeasurementStore, MemoryStore, PersistenceSink, StorageMetrics};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("VisualGraph ", env!("CARGO_PKG_VERSION")),
    about = "VisualGraph telemetry daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "ADDR", help = "Override the API listen address")]
    listen: Option<SocketAddr>,

    #[arg(long, value_name = "BACKEND", help = "Override the storage backend (journal|memory)")]
    storage: Option<StorageBackend>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the telemetry service")]
    Run,
    #[command(about = "Validate configuration and print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/vgraph.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let source_label = loaded.source_label();
    let mut config = loaded.config;
    if let Some(listen) = cli.listen {
        config.api.listen = listen;
    }
    if let Some(backend) = cli.storage {
        config.storage.backend = backend;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("# source: {source_label}");
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run => {
            init_tracing("vgraphd", &config.logging)?;
            info!(source = %source_label, "configuration loaded");
            run_daemon(config).await
        }
    }
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let generation_metrics = GenerationMetrics::new(registry.clone())?;
    let storage_metrics = StorageMetrics::new(registry.clone())?;

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store = open_store(&config.storage)?;
    let sink = Arc::new(PersistenceSink::spawn(
        store.clone(),
        config.storage.queue_capacity,
        Some(storage_metrics),
    ));
    let hub = BroadcastHub::spawn(
        config.hub.listener_capacity,
        Some(generation_metrics.clone()),
    );
    let controller = GenerationController::builder(
        config.generation.clone(),
        hub.clone(),
        store.clone(),
        sink.clone(),
    )
    .metrics(Some(generation_metrics))
    .build();

    let api_server = if config.api.enabled {
        Some(spawn_api(&config, controller.clone(), store, registry).await?)
    } else {
        info!("api server disabled by configuration");
        None
    };

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    controller.shutdown().await;
    hub.shutdown().await;
    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    sink.shutdown().await;
    let totals = sink.snapshot();
    info!(
        written = totals.written,
        failed = totals.failed,
        dropped = totals.dropped,
        "persistence sink drained"
    );
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn open_store(settings: &StorageConfig) -> Result<Arc<dyn MeasurementStore>> {
    match settings.backend {
        StorageBackend::Journal => {
            let store = JournalStore::open(&settings.journal_path).with_context(|| {
                format!("failed to open journal {}", settings.journal_path.display())
            })?;
            info!(path = %settings.journal_path.display(), "journal storage ready");
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!(
                retain = settings.memory_retain,
                "in-memory storage selected; rows are lost on restart"
            );
            Ok(Arc::new(MemoryStore::new(settings.memory_retain)))
        }
    }
}

async fn spawn_api(
    config: &AppConfig,
    controller: GenerationController,
    store: Arc<dyn MeasurementStore>,
    registry: SharedRegistry,
) -> Result<ApiServerHandle> {
    let mut builder = ApiServerBuilder::new(controller, store)
        .with_api_config(config.api.clone())
        .with_hub_config(config.hub.clone());
    if !config.metrics.enabled {
        builder = builder.with_metrics_registry(registry);
    }
    builder.spawn().await
}
