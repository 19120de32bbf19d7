//! Trace recorder
//!
//! Watches the configured resource kinds (and every pod) in a live cluster,
//! maintains the in-memory timeline store, and serves bounded trace exports
//! over HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use replay_lib::watch::WatchFabric;
use replay_lib::{
    ops, spawn_store_task, Component, HealthMonitor, Phase, RecorderMetrics, TimelineStore,
    TraceStorage, TrackerConfig,
};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let opts = config::Options::parse();
    info!(config_file = %opts.config_file, "Starting tracer");

    let tracker_config =
        TrackerConfig::load(&opts.config_file).context("tracker configuration is invalid")?;
    info!(tracked_kinds = tracker_config.tracked_objects.len(), "Tracker configured");

    let client = kube::Client::try_default()
        .await
        .context("could not build cluster client")?;

    let monitor = HealthMonitor::new(&[Component::WatchFabric, Component::Store, Component::ExportApi]);
    let metrics = RecorderMetrics::new();

    let (shutdown_tx, _) = broadcast::channel(1);
    let (store_handle, store_task) = spawn_store_task(TimelineStore::new(tracker_config.clone()));
    monitor.mark_up(Component::Store).await;

    monitor.advance(Phase::Syncing).await;
    let mut fabric = WatchFabric::start(client, tracker_config, store_handle.clone(), &shutdown_tx)
        .await
        .context("could not start watch fabric")?;
    fabric.wait_ready(&monitor).await;

    let state = Arc::new(api::AppState::new(store_handle.clone(), metrics));
    let app = api::trace_router(state).merge(ops::router(monitor.clone()));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", opts.server_port))
        .await
        .context("could not bind API port")?;
    info!(port = opts.server_port, "Serving export API");
    let api_task = tokio::spawn(async move { axum::serve(listener, app).await });
    monitor.mark_up(Component::ExportApi).await;

    monitor.advance(Phase::Serving).await;

    // Run until a termination signal or until a critical task dies
    tokio::select! {
        _ = shutdown_signal() => info!("Termination signal received, shutting down"),
        res = api_task => {
            error!(?res, "API server terminated");
            monitor.mark_down(Component::ExportApi, "server terminated").await;
        }
    }

    monitor.advance(Phase::Draining).await;
    let _ = shutdown_tx.send(());
    fabric.join().await;

    // Dropping the last handle lets the writer task finish and hand the
    // store back for the final persist.
    drop(store_handle);
    let store = store_task.await.context("store writer task panicked")?;

    if let Some(path) = &opts.final_export_path {
        persist_final_export(&store, path).await;
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("could not install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

/// Best-effort full export of everything the store saw, written on the way
/// out; failures are logged, never fatal to shutdown.
async fn persist_final_export(store: &TimelineStore, path: &str) {
    let (Some(start_ts), Some(end_ts)) = (store.start_ts(), store.end_ts()) else {
        info!("store is empty, skipping final export");
        return;
    };

    let res = async {
        let data = store.export(start_ts, end_ts, &Default::default())?;
        TraceStorage::new(path)?.put(data.into()).await
    }
    .await;

    match res {
        Ok(()) => info!(path, "final export written"),
        Err(err) => error!(error = %err, path, "final export failed"),
    }
}
