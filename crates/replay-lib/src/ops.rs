//! Shared operational HTTP surface
//!
//! Probe and metrics routes are identical on the recorder and the driver,
//! so both merge this router into whatever else they serve instead of
//! wiring their own handlers:
//!
//! - `GET /healthz`: 200 while the process is live, 503 once a component
//!   has failed; body is the full [`LivenessReport`]
//! - `GET /readyz`: 200 only in the serving phase with every component
//!   synced; 503 responses name the blockers
//! - `GET /metrics`: Prometheus exposition of the default registry

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use prometheus::TextEncoder;

use crate::health::HealthMonitor;

/// The probe + metrics router, ready to be merged into a binary's app.
pub fn router(monitor: HealthMonitor) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(monitor)
}

async fn healthz(State(monitor): State<HealthMonitor>) -> impl IntoResponse {
    let report = monitor.liveness().await;
    let status = if report.live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn readyz(State(monitor): State<HealthMonitor>) -> impl IntoResponse {
    let report = monitor.readiness().await;
    let status = if report.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn metrics() -> impl IntoResponse {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
