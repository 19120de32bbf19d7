//! Core library for recording and replaying cluster workload traces
//!
//! This crate provides the shared machinery for:
//! - Canonicalizing dynamic objects and hashing workload shapes
//! - The in-memory timeline store, kind index, and pod lifecycle table
//! - Watching configured kinds and the global pod population
//! - Encoding and decoding the binary trace document
//! - Replaying a trace on a scaled clock inside a simulation cluster
//! - Lifecycle probes and Prometheus metrics for both processes

pub mod backoff;
pub mod canonical;
pub mod codec;
pub mod config;
pub mod errors;
pub mod health;
pub mod k8s;
pub mod models;
pub mod observability;
pub mod ops;
pub mod ownership;
pub mod replay;
pub mod storage;
pub mod store;
pub mod watch;

pub use config::{TrackedKind, TrackerConfig};
pub use errors::{ApplyError, CodecError, ConfigError, ExportError};
pub use health::{Component, Condition, HealthMonitor, LivenessReport, Phase, ReadinessReport};
pub use models::{ExportFilters, ExportRequest, PodInterval, TimelineEvent};
pub use observability::{DriverMetrics, RecorderMetrics};
pub use ownership::OwnershipTracker;
pub use replay::{ClusterApplier, KubeApplier, ReplayControls, ReplayEngine, ReplaySettings, ReplayState};
pub use storage::TraceStorage;
pub use store::{spawn_store_task, StoreCommand, StoreHandle, StoreStats, TimelineStore};
