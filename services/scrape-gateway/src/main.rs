//! Scrape Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads per-user provider API keys from a JSON credential store
//! 2. Accepts batches of scrape work over HTTP
//! 3. Spreads the batches across the user's healthy keys, failing over
//!    between keys mid-item when one is rejected
//! 4. Returns a per-item report and writes key status back to the store

mod api;
mod config;
mod error;
mod metrics;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use common::SystemClock;
use key_store::FileStore;
use provider::ActorRunClient;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::{AppState, ServiceStats, build_router};
use crate::config::Config;

/// Time allowed for in-flight runs to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL wins over RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting scrape-gateway");

    // Install before any library crate emits a metric
    let prometheus_handle = metrics::install_recorder();

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        base_url = %config.remote.base_url,
        store = %config.store.path.display(),
        work_types = config.remote.actors.len(),
        batch_size = config.tuning.batch_size,
        min_active_floor = config.tuning.min_active_floor,
        "configuration loaded"
    );

    let store = FileStore::load(config.store.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential store {}",
                config.store.path.display()
            )
        })?;
    info!(credentials = store.len().await, "credential store loaded");

    let client = ActorRunClient::new(
        reqwest::Client::new(),
        config.remote.base_url.clone(),
        Duration::from_secs(config.remote.timeout_secs),
        Duration::from_secs(config.remote.probe_timeout_secs),
    );

    let stats = ServiceStats::new();
    let in_flight = stats.in_flight.clone();
    let listen_addr = config.server.listen_addr;
    let max_connections = config.server.max_connections;

    let state = AppState {
        store: Arc::new(store),
        client: Arc::new(client),
        clock: Arc::new(SystemClock),
        tuning: Arc::new(config.tuning),
        remote: Arc::new(config.remote),
        stats,
        prometheus: prometheus_handle,
    };

    let app = build_router(state, max_connections);

    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain timer starts at signal receipt, not at server start.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight runs drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
