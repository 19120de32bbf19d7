//! Observability infrastructure
//!
//! Provides:
//! - Prometheus metrics for the recorder (events, queue pressure, exports)
//!   and the driver (replay writes, admission decisions)
//! - all metrics register once in the default registry and are exposed
//!   through the process's `/metrics` endpoint

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;

/// Buckets for export latency (seconds); exports scale with trace size.
const EXPORT_LATENCY_BUCKETS: &[f64] = &[0.005, 0.025, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

static RECORDER_METRICS: OnceLock<RecorderMetricsInner> = OnceLock::new();
static DRIVER_METRICS: OnceLock<DriverMetricsInner> = OnceLock::new();

struct RecorderMetricsInner {
    events_recorded: IntCounterVec,
    store_dropped: IntCounter,
    watch_restarts: IntCounterVec,
    pods_tracked: IntGauge,
    export_latency_seconds: Histogram,
    export_failures: IntCounter,
}

impl RecorderMetricsInner {
    fn new() -> Self {
        Self {
            events_recorded: register_int_counter_vec!(
                "tracer_events_recorded_total",
                "Timeline events committed to the store, by action",
                &["action"]
            )
            .expect("Failed to register events_recorded"),

            store_dropped: register_int_counter!(
                "tracer_store_dropped_total",
                "Watch events dropped because the store queue was saturated"
            )
            .expect("Failed to register store_dropped"),

            watch_restarts: register_int_counter_vec!(
                "tracer_watch_restarts_total",
                "Watch stream errors that forced a resubscribe, by kind",
                &["kind"]
            )
            .expect("Failed to register watch_restarts"),

            pods_tracked: register_int_gauge!(
                "tracer_pods_tracked",
                "Pods currently tracked for lifecycle bookkeeping"
            )
            .expect("Failed to register pods_tracked"),

            export_latency_seconds: register_histogram!(
                "tracer_export_latency_seconds",
                "Time spent snapshotting and encoding an export request",
                EXPORT_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register export_latency_seconds"),

            export_failures: register_int_counter!(
                "tracer_export_failures_total",
                "Export requests that returned an error"
            )
            .expect("Failed to register export_failures"),
        }
    }
}

/// Recorder metrics handle; clones share the global instance.
#[derive(Clone)]
pub struct RecorderMetrics {
    _private: (),
}

impl Default for RecorderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderMetrics {
    pub fn new() -> Self {
        RECORDER_METRICS.get_or_init(RecorderMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RecorderMetricsInner {
        RECORDER_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_events_recorded(&self, action: &str) {
        self.inner().events_recorded.with_label_values(&[action]).inc();
    }

    pub fn inc_store_dropped(&self) {
        self.inner().store_dropped.inc();
    }

    pub fn inc_watch_restarts(&self, kind: &str) {
        self.inner().watch_restarts.with_label_values(&[kind]).inc();
    }

    pub fn set_pods_tracked(&self, count: i64) {
        self.inner().pods_tracked.set(count);
    }

    pub fn observe_export_latency(&self, duration_secs: f64) {
        self.inner().export_latency_seconds.observe(duration_secs);
    }

    pub fn inc_export_failures(&self) {
        self.inner().export_failures.inc();
    }
}

struct DriverMetricsInner {
    replay_writes: IntCounterVec,
    apply_retries: IntCounter,
    admission_reviews: IntCounterVec,
}

impl DriverMetricsInner {
    fn new() -> Self {
        Self {
            replay_writes: register_int_counter_vec!(
                "driver_replay_writes_total",
                "Objects written to the simulation cluster, by operation",
                &["op"]
            )
            .expect("Failed to register replay_writes"),

            apply_retries: register_int_counter!(
                "driver_apply_retries_total",
                "Transient apply failures that were retried"
            )
            .expect("Failed to register apply_retries"),

            admission_reviews: register_int_counter_vec!(
                "driver_admission_reviews_total",
                "Admission reviews processed, by outcome",
                &["outcome"]
            )
            .expect("Failed to register admission_reviews"),
        }
    }
}

/// Driver metrics handle; clones share the global instance.
#[derive(Clone)]
pub struct DriverMetrics {
    _private: (),
}

impl Default for DriverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverMetrics {
    pub fn new() -> Self {
        DRIVER_METRICS.get_or_init(DriverMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DriverMetricsInner {
        DRIVER_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_replay_writes(&self, op: &str) {
        self.inner().replay_writes.with_label_values(&[op]).inc();
    }

    pub fn inc_apply_retries(&self) {
        self.inner().apply_retries.inc();
    }

    pub fn inc_admission_reviews(&self, outcome: &str) {
        self.inner().admission_reviews.with_label_values(&[outcome]).inc();
    }
}
