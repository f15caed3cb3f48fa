//! Tracoor server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracoor_core::config::AppConfig;
use tracoor_server::{AppState, PermanentStore, RetentionSweeper, ServerMetrics, create_router};

/// Tracoor - Ethereum debugging artifact index
#[derive(Parser, Debug)]
#[command(name = "tracoord")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TRACOOR_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `TRACOOR_`
/// environment variables.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let path = std::path::Path::new(config_path);
    let mut figment = Figment::new();
    let has_config_file = path.exists();

    if has_config_file {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // TRACOOR_CONFIG only carries the file path
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("TRACOOR_") && key != "TRACOOR_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: tracoord --config /path/to/config.toml\n  \
             2. Environment variables: TRACOOR_STORAGE__TYPE=filesystem \
             TRACOOR_STORAGE__PATH=/var/lib/tracoor tracoord\n\n\
             See config/server.example.toml for example configuration.\n\
             Set TRACOOR_CONFIG env var to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TRACOOR_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    Ok(config)
}

async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tracoor v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    let metrics = Arc::new(
        ServerMetrics::new(Registry::new()).context("failed to register metrics")?,
    );

    // Initialize storage backend
    let storage = tracoor_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend connectivity verified");

    // Initialize metadata store
    let metadata = tracoor_metadata::from_config(&config.metadata, metrics.query.clone())
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // Lock owner must be unique per process among servers sharing the index
    let owner = format!("tracoord-{}", uuid::Uuid::new_v4());
    let (permanent, worker) = PermanentStore::new(
        &config.permanent_store,
        owner,
        storage.clone(),
        metadata.clone(),
        metrics.clone(),
    );
    if permanent.is_enabled() {
        tasks.push(tokio::spawn(worker.run(cancel.clone())));
    } else {
        tracing::info!("Permanent block store disabled");
    }

    let sweeper = RetentionSweeper::new(
        config.retention.clone(),
        storage.clone(),
        metadata.clone(),
        metrics.clone(),
    );
    let sweeper_cancel = cancel.clone();
    tasks.push(tokio::spawn(async move {
        sweeper.run(sweeper_cancel).await;
    }));

    let state = AppState::new(config.clone(), storage, metadata, permanent, metrics);
    let app = create_router(state);

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(cancel.clone()))
    .await?;

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Server stopped");
    Ok(())
}
