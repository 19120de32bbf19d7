//! Process lifecycle and health tracking
//!
//! Both binaries move through the same coarse lifecycle: they start, sync
//! against the cluster (the recorder lists its watches, the driver warms the
//! admission webhook), serve, and eventually drain. Readiness is a statement
//! about that lifecycle, not just a boolean someone remembered to flip: a
//! process is ready only while it is in the serving phase with every
//! component past its startup sync. Liveness is weaker on purpose; a process
//! that is still syncing or draining is alive, only a failed component makes
//! it dead.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

/// The long-running pieces a process is made of.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Component {
    /// Kind watchers plus the global pod watch (recorder)
    WatchFabric,
    /// The store writer task (recorder)
    Store,
    /// The export endpoint (recorder)
    ExportApi,
    /// The admission webhook server (driver)
    Admission,
    /// The replay engine (driver)
    Replay,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Component::WatchFabric => "watch_fabric",
            Component::Store => "store",
            Component::ExportApi => "export_api",
            Component::Admission => "admission",
            Component::Replay => "replay",
        };
        f.write_str(name)
    }
}

/// Where the process is in its life.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Booting: config loaded, nothing talking to the cluster yet
    Starting,
    /// Establishing cluster state: initial lists, webhook warmup
    Syncing,
    /// Normal operation
    Serving,
    /// Tearing down; no new work should be routed here
    Draining,
}

/// Condition of a single component.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    /// Registered but not yet through its startup sync
    Starting,
    /// Working
    Up,
    /// Limping (e.g. a watch stream cycling through resubscribes) but
    /// still doing its job
    Degraded,
    /// Failed; the process cannot do its job without it
    Down,
}

impl Condition {
    /// Down is the only condition that costs liveness; everything else is
    /// some flavor of working on it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Condition::Down)
    }

    /// Only components past their startup sync count toward readiness.
    pub fn is_synced(&self) -> bool {
        matches!(self, Condition::Up | Condition::Degraded)
    }

    fn as_str(&self) -> &'static str {
        match self {
            Condition::Starting => "starting",
            Condition::Up => "up",
            Condition::Degraded => "degraded",
            Condition::Down => "down",
        }
    }
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Syncing => "syncing",
            Phase::Serving => "serving",
            Phase::Draining => "draining",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ComponentReport {
    pub condition: Condition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the component last changed condition (Unix seconds)
    pub since_ts: i64,
}

/// Answer for the liveness probe.
#[derive(Clone, Debug, Serialize)]
pub struct LivenessReport {
    pub live: bool,
    pub phase: Phase,
    pub components: BTreeMap<String, ComponentReport>,
}

/// Answer for the readiness probe. `blockers` names whatever is in the way,
/// so a stuck rollout can be diagnosed from the probe output alone.
#[derive(Clone, Debug, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blockers: Vec<String>,
}

#[derive(Debug)]
struct MonitorState {
    phase: Phase,
    components: BTreeMap<Component, ComponentReport>,
}

/// Shared lifecycle monitor; clones observe and mutate the same state.
#[derive(Clone, Debug)]
pub struct HealthMonitor {
    state: Arc<RwLock<MonitorState>>,
}

impl HealthMonitor {
    /// A monitor in `Starting` phase with every listed component waiting on
    /// its startup sync.
    pub fn new(components: &[Component]) -> HealthMonitor {
        let components = components
            .iter()
            .map(|c| {
                (
                    *c,
                    ComponentReport {
                        condition: Condition::Starting,
                        detail: None,
                        since_ts: now_ts(),
                    },
                )
            })
            .collect();

        HealthMonitor {
            state: Arc::new(RwLock::new(MonitorState {
                phase: Phase::Starting,
                components,
            })),
        }
    }

    /// Move the process to a new lifecycle phase.
    pub async fn advance(&self, phase: Phase) {
        self.state.write().await.phase = phase;
    }

    pub async fn phase(&self) -> Phase {
        self.state.read().await.phase
    }

    pub async fn mark_up(&self, component: Component) {
        self.set_condition(component, Condition::Up, None).await;
    }

    pub async fn mark_degraded(&self, component: Component, detail: impl Into<String>) {
        self.set_condition(component, Condition::Degraded, Some(detail.into())).await;
    }

    pub async fn mark_down(&self, component: Component, detail: impl Into<String>) {
        self.set_condition(component, Condition::Down, Some(detail.into())).await;
    }

    async fn set_condition(&self, component: Component, condition: Condition, detail: Option<String>) {
        let mut state = self.state.write().await;
        let report = state.components.entry(component).or_insert(ComponentReport {
            condition,
            detail: detail.clone(),
            since_ts: now_ts(),
        });
        if report.condition != condition {
            report.since_ts = now_ts();
        }
        report.condition = condition;
        report.detail = detail;
    }

    /// Live unless some component has outright failed. Syncing and draining
    /// processes are alive.
    pub async fn liveness(&self) -> LivenessReport {
        let state = self.state.read().await;
        LivenessReport {
            live: !state.components.values().any(|r| r.condition.is_fatal()),
            phase: state.phase,
            components: state
                .components
                .iter()
                .map(|(c, r)| (c.to_string(), r.clone()))
                .collect(),
        }
    }

    /// Ready only in the `Serving` phase with every component synced.
    pub async fn readiness(&self) -> ReadinessReport {
        let state = self.state.read().await;
        let mut blockers: Vec<String> = vec![];

        if state.phase != Phase::Serving {
            blockers.push(format!("process is {}", state.phase.as_str()));
        }
        for (component, report) in &state.components {
            if !report.condition.is_synced() {
                blockers.push(match &report.detail {
                    Some(detail) => format!("{component} is {}: {detail}", report.condition.as_str()),
                    None => format!("{component} is {}", report.condition.as_str()),
                });
            }
        }

        ReadinessReport {
            ready: blockers.is_empty(),
            phase: state.phase,
            blockers,
        }
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder_monitor() -> HealthMonitor {
        HealthMonitor::new(&[Component::WatchFabric, Component::Store, Component::ExportApi])
    }

    #[tokio::test]
    async fn test_starting_process_is_live_but_not_ready() {
        let monitor = recorder_monitor();

        assert!(monitor.liveness().await.live, "startup sync must not fail liveness");

        let readiness = monitor.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.phase, Phase::Starting);
        // the phase plus each unsynced component shows up as a blocker
        assert_eq!(readiness.blockers.len(), 4);
    }

    #[tokio::test]
    async fn test_ready_requires_serving_phase_and_synced_components() {
        let monitor = recorder_monitor();
        monitor.mark_up(Component::WatchFabric).await;
        monitor.mark_up(Component::Store).await;
        monitor.mark_up(Component::ExportApi).await;

        // components synced but still syncing phase
        monitor.advance(Phase::Syncing).await;
        assert!(!monitor.readiness().await.ready);

        monitor.advance(Phase::Serving).await;
        assert!(monitor.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_unsynced_component_blocks_readiness_by_name() {
        let monitor = recorder_monitor();
        monitor.mark_up(Component::Store).await;
        monitor.mark_up(Component::ExportApi).await;
        monitor.advance(Phase::Serving).await;

        let readiness = monitor.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.blockers, vec!["watch_fabric is starting".to_string()]);
    }

    #[tokio::test]
    async fn test_degraded_component_stays_live_and_ready() {
        let monitor = recorder_monitor();
        monitor.mark_up(Component::WatchFabric).await;
        monitor.mark_up(Component::Store).await;
        monitor.mark_up(Component::ExportApi).await;
        monitor.advance(Phase::Serving).await;

        monitor.mark_degraded(Component::WatchFabric, "watch stream resubscribing").await;

        assert!(monitor.liveness().await.live);
        assert!(monitor.readiness().await.ready, "degraded still does its job");
    }

    #[tokio::test]
    async fn test_down_component_fails_liveness_and_readiness() {
        let monitor = recorder_monitor();
        monitor.mark_up(Component::WatchFabric).await;
        monitor.mark_up(Component::Store).await;
        monitor.mark_up(Component::ExportApi).await;
        monitor.advance(Phase::Serving).await;

        monitor.mark_down(Component::Store, "writer task exited").await;

        let liveness = monitor.liveness().await;
        assert!(!liveness.live);
        assert_eq!(liveness.components["store"].condition, Condition::Down);

        let readiness = monitor.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.blockers, vec!["store is down: writer task exited".to_string()]);
    }

    #[tokio::test]
    async fn test_draining_revokes_readiness_without_failing_liveness() {
        let monitor = recorder_monitor();
        monitor.mark_up(Component::WatchFabric).await;
        monitor.mark_up(Component::Store).await;
        monitor.mark_up(Component::ExportApi).await;
        monitor.advance(Phase::Serving).await;
        assert!(monitor.readiness().await.ready);

        monitor.advance(Phase::Draining).await;

        assert!(monitor.liveness().await.live);
        let readiness = monitor.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.blockers, vec!["process is draining".to_string()]);
    }

    #[tokio::test]
    async fn test_condition_transitions_refresh_the_timestamp_shape() {
        let monitor = HealthMonitor::new(&[Component::Admission]);
        monitor.mark_up(Component::Admission).await;

        let liveness = monitor.liveness().await;
        let report = &liveness.components["admission"];
        assert_eq!(report.condition, Condition::Up);
        assert!(report.since_ts > 0);

        let body = serde_json::to_value(&liveness).unwrap();
        assert_eq!(body["components"]["admission"]["condition"], "up");
        assert_eq!(body["phase"], "starting");
    }
}
