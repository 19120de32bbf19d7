//! Trace export and status endpoints
//!
//! Probe and metrics routes come from the shared ops router; this module
//! only carries the recorder-specific surface:
//!
//! - `POST /export`: reduce the store to a requested window and return (or
//!   upload) the binary trace
//! - `GET /status`: summary of what the store currently holds

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use replay_lib::{ExportError, ExportRequest, RecorderMetrics, StoreHandle, TraceStorage};
use tracing::{error, info};

/// How long an export request may wait for a store snapshot.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// State behind the recorder-specific routes.
#[derive(Clone)]
pub struct AppState {
    pub store: StoreHandle,
    pub metrics: RecorderMetrics,
}

impl AppState {
    pub fn new(store: StoreHandle, metrics: RecorderMetrics) -> Self {
        Self { store, metrics }
    }
}

/// The recorder's own routes; the caller merges in the ops router.
pub fn trace_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/export", post(export))
        .route("/status", get(status))
        .with_state(state)
}

/// Export a bounded window of the store as a binary trace.
///
/// 200 with the trace bytes (empty when written to a cloud destination),
/// 400 on an invalid range, 503 when no snapshot could be taken.
async fn export(State(state): State<Arc<AppState>>, Json(req): Json<ExportRequest>) -> impl IntoResponse {
    info!(start_ts = req.start_ts, end_ts = req.end_ts, "export requested");
    let started = Instant::now();

    if req.end_ts < req.start_ts {
        state.metrics.inc_export_failures();
        return (
            StatusCode::BAD_REQUEST,
            format!("invalid export range: end_ts {} < start_ts {}", req.end_ts, req.start_ts),
        )
            .into_response();
    }

    let snapshot = match state.store.snapshot(SNAPSHOT_TIMEOUT).await {
        Ok(snapshot) => snapshot,
        Err(err @ ExportError::Unavailable(_)) => {
            error!(error = %err, "export snapshot unavailable");
            state.metrics.inc_export_failures();
            return (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response();
        },
        Err(err) => {
            state.metrics.inc_export_failures();
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        },
    };

    let data = match snapshot.export(req.start_ts, req.end_ts, &req.filters) {
        Ok(data) => data,
        Err(err) => {
            error!(error = %err, "export failed");
            state.metrics.inc_export_failures();
            let status = match err.downcast_ref::<ExportError>() {
                Some(ExportError::InvalidRange { .. }) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, err.to_string()).into_response();
        },
    };

    // Cloud destinations are written from here to keep the bytes close to
    // the bucket; anything else goes back to the caller.
    if let Some(path) = &req.export_path {
        match TraceStorage::new(path) {
            Ok(storage) if storage.is_remote() => {
                if let Err(err) = storage.put(data.into()).await {
                    error!(error = %err, path, "writing trace to remote storage failed");
                    state.metrics.inc_export_failures();
                    return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
                }
                state.metrics.observe_export_latency(started.elapsed().as_secs_f64());
                return (StatusCode::OK, Vec::new()).into_response();
            },
            Ok(_) => {},
            Err(err) => {
                state.metrics.inc_export_failures();
                return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            },
        }
    }

    state.metrics.observe_export_latency(started.elapsed().as_secs_f64());
    (StatusCode::OK, data).into_response()
}

/// Summary of the store's current contents.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.snapshot(SNAPSHOT_TIMEOUT).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.stats())).into_response(),
        Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response(),
    }
}
