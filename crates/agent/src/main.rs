//! Tracoor collector agent binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracoor_agent::{
    AgentMetrics, HttpIndexClient, HttpSource, IngestQueue, Pipeline, Poller, metrics_router,
    storage_handshake,
};
use tracoor_core::config::AgentConfig;

/// Tracoor agent - collects Ethereum debugging artifacts
#[derive(Parser, Debug)]
#[command(name = "tracoor-agent")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TRACOOR_AGENT_CONFIG",
        default_value = "config/agent.toml"
    )]
    config: String,
}

fn load_config(config_path: &str) -> Result<AgentConfig> {
    let path = std::path::Path::new(config_path);
    let mut figment = Figment::new();

    if path.exists() {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(config_path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    let config: AgentConfig = figment
        .merge(Env::prefixed("TRACOOR_AGENT_").split("__"))
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
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Tracoor agent v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    let metrics =
        Arc::new(AgentMetrics::new(Registry::new()).context("failed to register metrics")?);

    let storage = tracoor_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;

    let index = Arc::new(
        HttpIndexClient::new(&config.server_url, config.request_timeout())
            .context("failed to build server client")?,
    );
    let source = Arc::new(
        HttpSource::new(
            &config.beacon_node_url,
            config.execution_node_url.as_deref(),
            config.request_timeout(),
        )
        .context("failed to build node client")?,
    );

    storage_handshake(storage.as_ref(), index.as_ref(), &config.name)
        .await
        .context("storage handshake with the server failed")?;

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let pipeline = Arc::new(Pipeline::new(storage, index, source.clone()));
    let (queue, workers) = IngestQueue::new(&config.queues, pipeline, metrics.clone());
    for worker in workers {
        tasks.push(tokio::spawn(worker.run(cancel.clone())));
    }

    let poller = Poller::new(
        config.name.clone(),
        config.network.clone(),
        source,
        queue,
        metrics.clone(),
        config.poll_interval(),
    );
    tasks.push(tokio::spawn(poller.run(cancel.clone())));

    if let Some(bind) = &config.metrics_bind {
        let addr: SocketAddr = bind.parse().context("invalid metrics bind address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind to {}", addr))?;
        tracing::info!("Serving metrics on {}", addr);
        let metrics_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics_router(metrics))
                .with_graceful_shutdown(async move { metrics_cancel.cancelled().await })
                .await
            {
                tracing::error!(error = %e, "Metrics server failed");
            }
        }));
    }

    shutdown_signal(cancel.clone()).await;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Agent stopped");
    Ok(())
}
