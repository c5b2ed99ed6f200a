//! gridop Operator
//!
//! Keeps data-grid clusters converged to their declared roles and sizes.
//! Standalone mode runs against the in-memory store, optionally seeded from
//! a JSON manifest of clusters, with the local workload runtime.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use gridop_api::ClusterResource;
use gridop_operator::{
    config,
    events::LogRecorder,
    health::{ClusterHealth, RestHealthChecker, StaticHealth},
    runtime::LocalRuntime,
    store::{MemoryStore, ResourceStore},
    Operator,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to GRIDOP_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting gridop operator");
    info!(
        workers = config.workers,
        status_ha_retry_secs = config.status_ha_retry.as_secs(),
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &config.manifest {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let clusters: Vec<ClusterResource> =
            serde_json::from_str(&raw).context("parsing manifest")?;
        for cluster in clusters {
            let name = cluster.metadata.name.clone();
            store
                .create_cluster(cluster)
                .await
                .with_context(|| format!("seeding cluster {name}"))?;
        }
        info!(path = %path.display(), "Manifest loaded");
    }

    let health: Arc<dyn ClusterHealth> = if config.dev_mode {
        info!("Using static StatusHA (dev mode)");
        Arc::new(StaticHealth::new(true))
    } else {
        Arc::new(RestHealthChecker::new(
            config.management_port,
            config.health_timeout,
        )?)
    };

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runtime_handle = tokio::spawn({
        let runtime = LocalRuntime::new(store.clone());
        let shutdown_rx = shutdown_rx.clone();
        async move {
            runtime.run(shutdown_rx).await;
        }
    });

    let operator = Operator::new(&config, store, Arc::new(LogRecorder), health);
    let mut operator_handle = tokio::spawn(operator.run(shutdown_rx));

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut operator_handle => {
            if let Err(e) = result {
                error!(error = %e, "Operator task panicked");
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if !operator_handle.is_finished() {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, operator_handle).await {
            warn!(error = %e, "Operator did not shut down in time");
        }
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, runtime_handle).await {
        warn!(error = %e, "Local runtime did not shut down in time");
    }

    info!("Operator shutdown complete");
    Ok(())
}
