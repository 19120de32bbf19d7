//! Simulation driver
//!
//! Fetches a recorded trace, serves the admission webhook that steers
//! simulated pods onto virtual nodes, and replays the trace against the
//! simulation cluster on a scaled clock. Exits 0 when the replay reaches
//! `Done`, non-zero on `Failed`; SIGTERM triggers a drain.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::post;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use replay_lib::watch::{ApiOwnerLookup, OwnershipResolver};
use replay_lib::{
    codec, ops, Component, DriverMetrics, HealthMonitor, KubeApplier, OwnershipTracker, Phase,
    ReplayControls, ReplayEngine, ReplaySettings, TimelineStore, TraceStorage,
};
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod admission;
mod config;

use admission::DriverState;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let opts = config::Options::parse();
    if let Err(err) = run(opts).await {
        error!(error = ?err, "driver failed");
        std::process::exit(1);
    }
}

async fn run(opts: config::Options) -> Result<()> {
    info!(sim_name = %opts.sim_name, trace_path = %opts.trace_path, "Starting driver");

    let monitor = HealthMonitor::new(&[Component::Admission, Component::Replay]);

    let client = kube::Client::try_default()
        .await
        .context("could not build cluster client")?;

    let trace_data = TraceStorage::new(&opts.trace_path)?
        .get()
        .await
        .context("could not fetch trace")?;
    let doc = codec::decode(&trace_data).context("trace is unusable")?;
    let store = TimelineStore::from_document(doc, None);

    let state = Arc::new(DriverState {
        sim_name: opts.sim_name.clone(),
        root_name: opts.root_name.clone(),
        store: store.clone(),
        tracker: OwnershipTracker::new(store.lifecycles().clone()),
        resolver: OwnershipResolver::new(ApiOwnerLookup::new(client.clone())),
        metrics: DriverMetrics::new(),
    });

    let tls = RustlsConfig::from_pem_file(&opts.cert_path, &opts.key_path)
        .await
        .context("could not load webhook TLS material")?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, opts.admission_port));
    let app = Router::new()
        .route("/mutate", post(admission::mutate::<ApiOwnerLookup>))
        .with_state(state)
        .merge(ops::router(monitor.clone()));
    let server_task = tokio::spawn(async move {
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
    });

    // The webhook must be answering before the first replayed object fans
    // out into pods
    monitor.advance(Phase::Syncing).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    monitor.mark_up(Component::Admission).await;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    spawn_signal_forwarder(shutdown_tx.clone());

    let settings = ReplaySettings {
        sim_name: opts.sim_name,
        root_name: opts.root_name,
        virtual_ns_prefix: opts.virtual_ns_prefix,
    };
    let controls = ReplayControls {
        speed_factor: opts.speed_factor,
        duration: opts.duration_seconds.map(Duration::from_secs),
        repetitions: opts.repetitions,
    };

    let mut engine = ReplayEngine::new(KubeApplier::new(client), store, settings, controls);
    monitor.mark_up(Component::Replay).await;
    monitor.advance(Phase::Serving).await;
    let mut replay_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    let res = tokio::select! {
        res = &mut replay_task => res.context("replay task panicked")?,
        res = server_task => {
            // losing the webhook means new pods stop being mutated; drain
            error!(?res, "admission server terminated, draining");
            monitor.mark_down(Component::Admission, "server terminated").await;
            let _ = shutdown_tx.send(());
            replay_task.await.context("replay task panicked")?
        },
    };

    monitor.advance(Phase::Draining).await;
    if let Err(err) = &res {
        monitor.mark_down(Component::Replay, err.to_string()).await;
    }
    res
}

fn spawn_signal_forwarder(shutdown_tx: broadcast::Sender<()>) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("could not install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        info!("termination signal received, draining simulation");
        let _ = shutdown_tx.send(());
    });
}
