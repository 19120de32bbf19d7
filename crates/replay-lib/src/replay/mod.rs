//! Replay engine
//!
//! Drives a decoded trace against the simulation cluster:
//!
//! - `Init`: validate controls, locate the trace origin, ensure the
//!   simulation root exists
//! - `Priming`: apply the alive-at-start event, creating virtual namespaces
//!   lazily as objects demand them
//! - `Playing`: apply each subsequent event at its scaled deadline, deletes
//!   before applies, applies in a stable (kind, name) order
//! - `Draining`: foreground-delete the simulation root and wait for the
//!   garbage collector, bounded by a hard deadline
//! - `Done` / `Failed` are terminal
//!
//! A single cancellation signal moves any non-terminal state to `Draining`.
//! All cluster writes go through the [`ClusterApplier`] trait; transient
//! failures retry with capped backoff, anything else fails the run.

pub mod clock;
mod cluster;

pub use self::cluster::KubeApplier;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, warn};

use self::clock::ReplayClock;
use crate::backoff::Backoff;
use crate::errors::ApplyError;
use crate::k8s::{
    stamp_simulation_metadata, KindId, ResourceIdentityExt, SimulationRoot,
    SOURCE_NAMESPACE_ANNOTATION_KEY,
};
use crate::observability::DriverMetrics;
use crate::store::TimelineStore;
use crate::models::TimelineEvent;

const MAX_APPLY_ATTEMPTS: u32 = 4;
const APPLY_BASE_DELAY: Duration = Duration::from_millis(500);
const APPLY_MAX_DELAY: Duration = Duration::from_secs(8);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReplayState {
    Init,
    Priming,
    Playing,
    Draining,
    Done,
    Failed,
}

/// Scheduling controls for one replay run.
#[derive(Clone, Debug)]
pub struct ReplayControls {
    /// Trace-time over wall-time; 2.0 plays twice as fast as recorded.
    pub speed_factor: f64,
    /// Extra wall-time to hold the simulated state after the last event.
    pub duration: Option<Duration>,
    /// Full passes over the timeline.
    pub repetitions: u32,
}

impl Default for ReplayControls {
    fn default() -> Self {
        Self {
            speed_factor: 1.0,
            duration: None,
            repetitions: 1,
        }
    }
}

impl ReplayControls {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.speed_factor.is_finite() && self.speed_factor > 0.0,
            "speed factor must be positive, got {}",
            self.speed_factor
        );
        anyhow::ensure!(self.repetitions >= 1, "repetitions must be at least 1");
        Ok(())
    }
}

/// Identity of the simulation this engine drives.
#[derive(Clone, Debug)]
pub struct ReplaySettings {
    pub sim_name: String,
    pub root_name: String,
    pub virtual_ns_prefix: String,
}

/// The engine's window onto the cluster. Kept narrow so replay logic can be
/// exercised against a stub orchestrator.
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    async fn ensure_root(&self, name: &str, sim_name: &str) -> anyhow::Result<SimulationRoot>;
    async fn ensure_namespace(&self, namespace: &str, root: &SimulationRoot) -> Result<(), ApplyError>;
    async fn apply(&self, obj: &DynamicObject) -> Result<(), ApplyError>;
    async fn delete(&self, kind: &KindId, namespace: &str, name: &str) -> Result<(), ApplyError>;
    /// Returns true once the root (and therefore everything it owns) is gone.
    async fn delete_root(&self, name: &str) -> anyhow::Result<bool>;
}

pub struct ReplayEngine<A> {
    applier: A,
    store: TimelineStore,
    settings: ReplaySettings,
    controls: ReplayControls,
    state: ReplayState,
    failure: Option<String>,
    created_namespaces: Mutex<HashSet<String>>,
    metrics: DriverMetrics,
}

impl<A: ClusterApplier> ReplayEngine<A> {
    pub fn new(
        applier: A,
        store: TimelineStore,
        settings: ReplaySettings,
        controls: ReplayControls,
    ) -> ReplayEngine<A> {
        ReplayEngine {
            applier,
            store,
            settings,
            controls,
            state: ReplayState::Init,
            failure: None,
            created_namespaces: Mutex::new(HashSet::new()),
            metrics: DriverMetrics::new(),
        }
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    /// Reason for a `Failed` terminal state.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Run the trace to completion (or cancellation). Returns an error iff
    /// the terminal state is `Failed`.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        self.state = ReplayState::Init;
        if let Err(err) = self.controls.validate() {
            self.state = ReplayState::Failed;
            self.failure = Some(err.to_string());
            return Err(err);
        }

        let Some(trace_t0) = self.store.start_ts() else {
            self.state = ReplayState::Failed;
            self.failure = Some("trace contains no events".into());
            anyhow::bail!("trace contains no events");
        };

        let root = match self
            .applier
            .ensure_root(&self.settings.root_name, &self.settings.sim_name)
            .await
        {
            Ok(root) => root,
            Err(err) => {
                self.state = ReplayState::Failed;
                self.failure = Some(err.to_string());
                return Err(err);
            },
        };

        let events = self.store.events().to_vec();
        let mut cancelled = false;

        'passes: for pass in 1..=self.controls.repetitions {
            info!(pass, total = self.controls.repetitions, "starting replay pass");
            let clock = ReplayClock::new(trace_t0, self.controls.speed_factor);
            let mut events_iter = events.iter();

            self.state = ReplayState::Priming;
            if let Some(first) = events_iter.next() {
                if let Err(err) = self.play_event(first, &root).await {
                    self.failure = Some(err.to_string());
                    break 'passes;
                }
            }

            self.state = ReplayState::Playing;
            for evt in events_iter {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("cancellation received, draining");
                        cancelled = true;
                        break 'passes;
                    }
                    _ = tokio::time::sleep_until(clock.deadline_for(evt.ts)) => {}
                }

                if let Err(err) = self.play_event(evt, &root).await {
                    self.failure = Some(err.to_string());
                    break 'passes;
                }
            }
        }

        if self.failure.is_none() && !cancelled {
            if let Some(duration) = self.controls.duration {
                info!(hold_secs = duration.as_secs(), "trace finished, holding simulated state");
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = tokio::time::sleep(duration) => {}
                }
            }
        }

        self.state = ReplayState::Draining;
        if let Err(err) = self.drain().await {
            self.failure.get_or_insert(err.to_string());
        }

        match self.failure.take() {
            None => {
                self.state = ReplayState::Done;
                Ok(())
            },
            Some(reason) => {
                self.state = ReplayState::Failed;
                self.failure = Some(reason.clone());
                Err(anyhow::anyhow!("replay failed: {reason}"))
            },
        }
    }

    /// Apply one timeline event: deletes first (avoids transient name
    /// conflicts), then applies in (kind, namespace/name) order.
    async fn play_event(&self, evt: &TimelineEvent, root: &SimulationRoot) -> Result<(), ApplyError> {
        for obj in &evt.deleted_objs {
            let Ok(kind) = KindId::of(obj) else {
                warn!(object = %obj.namespaced_name(), "deleted object has no type metadata, skipping");
                continue;
            };
            let Some(orig_ns) = obj.namespace() else {
                continue;
            };

            let virtual_ns = self.virtual_ns(&orig_ns);
            let name = obj.name_any();
            info!(object = %format!("{virtual_ns}/{name}"), "deleting object");
            self.with_retry(|| self.applier.delete(&kind, &virtual_ns, &name)).await?;
            self.metrics.inc_replay_writes("delete");
        }

        let mut applies: Vec<&DynamicObject> = evt.applied_objs.iter().collect();
        applies.sort_by_key(|obj| {
            (
                obj.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default(),
                obj.namespaced_name(),
            )
        });

        for obj in applies {
            let vobj = self
                .virtualize(obj, root)
                .map_err(|err| ApplyError::Permanent(err.to_string()))?;

            let virtual_ns = vobj.namespace().unwrap_or_default();
            let first_use = self.created_namespaces.lock().unwrap().insert(virtual_ns.clone());
            if first_use {
                info!(namespace = %virtual_ns, "creating virtual namespace");
                self.with_retry(|| self.applier.ensure_namespace(&virtual_ns, root)).await?;
            }

            info!(object = %vobj.namespaced_name(), "applying object");
            self.with_retry(|| self.applier.apply(&vobj)).await?;
            self.metrics.inc_replay_writes("apply");
        }

        Ok(())
    }

    /// Rewrite a recorded object for the simulation: prefixed namespace,
    /// simulation labels, ownership by the root, the source namespace
    /// annotated onto each pod template, and container ports stripped (the
    /// apiserver rejects patches with duplicate ports, and simulated pods
    /// never serve traffic anyway).
    fn virtualize(&self, obj: &DynamicObject, root: &SimulationRoot) -> anyhow::Result<DynamicObject> {
        let kind = KindId::of(obj)?;
        let orig_ns = obj
            .namespace()
            .ok_or_else(|| anyhow::anyhow!("cannot replay cluster-scoped object {}", obj.name_any()))?;

        let mut vobj = obj.clone();
        vobj.metadata.namespace = Some(self.virtual_ns(&orig_ns));
        stamp_simulation_metadata(&self.settings.sim_name, root, &mut vobj.metadata);

        if let Some(map) = vobj.data.as_object_mut() {
            map.remove("status");
        }

        for path in self.store.config().template_paths_for(&kind) {
            for template in path.resolve_mut(&mut vobj.data)? {
                annotate_source_namespace(template, &orig_ns);
                strip_container_ports(template);
            }
        }

        Ok(vobj)
    }

    fn virtual_ns(&self, original_ns: &str) -> String {
        format!("{}-{}", self.settings.virtual_ns_prefix, original_ns)
    }

    async fn with_retry<F, Fut>(&self, mut op: F) -> Result<(), ApplyError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ApplyError>>,
    {
        let mut backoff = Backoff::new(APPLY_BASE_DELAY, APPLY_MAX_DELAY);
        let mut last_msg = String::new();

        for attempt in 1..=MAX_APPLY_ATTEMPTS {
            match op().await {
                Ok(()) => return Ok(()),
                Err(ApplyError::Transient(msg)) => {
                    warn!(attempt, error = %msg, "transient write failure, backing off");
                    self.metrics.inc_apply_retries();
                    last_msg = msg;
                    if attempt < MAX_APPLY_ATTEMPTS {
                        tokio::time::sleep(backoff.next_delay()).await;
                    }
                },
                Err(permanent) => return Err(permanent),
            }
        }

        Err(ApplyError::Permanent(format!(
            "still failing after {MAX_APPLY_ATTEMPTS} attempts: {last_msg}"
        )))
    }

    async fn drain(&self) -> anyhow::Result<()> {
        info!(root = %self.settings.root_name, "draining simulation objects");
        let deadline = Instant::now() + DRAIN_TIMEOUT;

        loop {
            if self.applier.delete_root(&self.settings.root_name).await? {
                info!("all simulation objects deleted");
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("timed out deleting simulation root {}", self.settings.root_name);
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

fn annotate_source_namespace(template: &mut Value, original_ns: &str) {
    let annotations = template
        .as_object_mut()
        .map(|t| {
            t.entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()))
        })
        .and_then(Value::as_object_mut)
        .map(|m| {
            m.entry("annotations")
                .or_insert_with(|| Value::Object(Default::default()))
        })
        .and_then(Value::as_object_mut);

    if let Some(annotations) = annotations {
        annotations.insert(SOURCE_NAMESPACE_ANNOTATION_KEY.into(), Value::String(original_ns.into()));
    }
}

fn strip_container_ports(template: &mut Value) {
    let Some(spec) = template.get_mut("spec").and_then(Value::as_object_mut) else {
        return;
    };
    for field in ["containers", "initContainers"] {
        if let Some(Value::Array(containers)) = spec.get_mut(field) {
            for container in containers {
                if let Some(c) = container.as_object_mut() {
                    c.remove("ports");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kube::api::TypeMeta;
    use serde_json::json;

    use super::*;
    use crate::config::TrackerConfig;

    #[derive(Clone, Debug, PartialEq)]
    enum Op {
        EnsureNamespace(String),
        Apply(String),
        Delete(String),
    }

    #[derive(Clone, Default)]
    struct StubCluster {
        ops: Arc<Mutex<Vec<(Op, Instant)>>>,
        fail_applies_with: Arc<Mutex<Option<ApplyError>>>,
        root_deleted: Arc<Mutex<bool>>,
        transient_failures_remaining: Arc<Mutex<u32>>,
    }

    impl StubCluster {
        fn ops(&self) -> Vec<Op> {
            self.ops.lock().unwrap().iter().map(|(op, _)| op.clone()).collect()
        }

        fn op_instants(&self) -> Vec<(Op, Instant)> {
            self.ops.lock().unwrap().clone()
        }

        fn record(&self, op: Op) {
            self.ops.lock().unwrap().push((op, Instant::now()));
        }
    }

    #[async_trait]
    impl ClusterApplier for StubCluster {
        async fn ensure_root(&self, name: &str, _sim_name: &str) -> anyhow::Result<SimulationRoot> {
            let mut root = SimulationRoot::new(name, Default::default());
            root.metadata.uid = Some("root-uid".into());
            Ok(root)
        }

        async fn ensure_namespace(&self, namespace: &str, _root: &SimulationRoot) -> Result<(), ApplyError> {
            self.record(Op::EnsureNamespace(namespace.into()));
            Ok(())
        }

        async fn apply(&self, obj: &DynamicObject) -> Result<(), ApplyError> {
            {
                let mut remaining = self.transient_failures_remaining.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ApplyError::Transient("injected".into()));
                }
            }
            if let Some(err) = self.fail_applies_with.lock().unwrap().take() {
                return Err(err);
            }
            self.record(Op::Apply(obj.namespaced_name()));
            Ok(())
        }

        async fn delete(&self, _kind: &KindId, namespace: &str, name: &str) -> Result<(), ApplyError> {
            self.record(Op::Delete(format!("{namespace}/{name}")));
            Ok(())
        }

        async fn delete_root(&self, _name: &str) -> anyhow::Result<bool> {
            *self.root_deleted.lock().unwrap() = true;
            Ok(true)
        }
    }

    fn deployment(ns: &str, name: &str) -> DynamicObject {
        let mut obj = DynamicObject {
            types: Some(TypeMeta { api_version: "apps/v1".into(), kind: "Deployment".into() }),
            metadata: Default::default(),
            data: json!({
                "spec": {
                    "replicas": 1,
                    "template": {"spec": {"containers": [{"name": "c", "ports": [{"containerPort": 80}]}]}},
                },
                "status": {"readyReplicas": 1},
            }),
        };
        obj.metadata.namespace = Some(ns.into());
        obj.metadata.name = Some(name.into());
        obj
    }

    fn store_with_events(events: Vec<TimelineEvent>) -> TimelineStore {
        let config: TrackerConfig = serde_yaml::from_str(
            "trackedObjects:\n  apps/v1.Deployment:\n    podSpecTemplatePaths: [\"/spec/template\"]\n",
        )
        .unwrap();

        let doc = crate::codec::TraceDocument {
            version: crate::codec::TRACE_VERSION,
            config,
            events,
            index: Default::default(),
            pod_lifecycles: Default::default(),
        };
        TimelineStore::from_document(doc, None)
    }

    fn engine(store: TimelineStore, controls: ReplayControls) -> (ReplayEngine<StubCluster>, StubCluster) {
        let cluster = StubCluster::default();
        let settings = ReplaySettings {
            sim_name: "sim-1".into(),
            root_name: "sim-1-root".into(),
            virtual_ns_prefix: "virt".into(),
        };
        (ReplayEngine::new(cluster.clone(), store, settings, controls), cluster)
    }

    fn shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
        broadcast::channel(1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_play_on_the_scaled_clock() {
        let store = store_with_events(vec![
            TimelineEvent { ts: 0, applied_objs: vec![deployment("default", "a")], deleted_objs: vec![] },
            TimelineEvent { ts: 10, applied_objs: vec![deployment("default", "b")], deleted_objs: vec![] },
        ]);
        let (mut engine, cluster) = engine(store, ReplayControls { speed_factor: 10.0, ..Default::default() });
        let (_tx, rx) = shutdown_channel();

        let start = Instant::now();
        engine.run(rx).await.unwrap();

        let ops = cluster.op_instants();
        let b_applied_at = ops
            .iter()
            .find(|(op, _)| *op == Op::Apply("virt-default/b".into()))
            .map(|(_, at)| *at)
            .unwrap();

        // ts=10 at 10x speed is due one second in; allow scheduling slack up
        // to one more second
        let offset = b_applied_at - start;
        assert!(offset >= Duration::from_secs(1), "applied too early: {offset:?}");
        assert!(offset < Duration::from_secs(2), "applied too late: {offset:?}");
        assert_eq!(engine.state(), ReplayState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletes_play_before_applies_and_applies_are_ordered() {
        let store = store_with_events(vec![
            TimelineEvent { ts: 0, applied_objs: vec![deployment("default", "old")], deleted_objs: vec![] },
            TimelineEvent {
                ts: 5,
                applied_objs: vec![deployment("default", "zeta"), deployment("default", "alpha")],
                deleted_objs: vec![deployment("default", "old")],
            },
        ]);
        let (mut engine, cluster) = engine(store, Default::default());
        let (_tx, rx) = shutdown_channel();
        engine.run(rx).await.unwrap();

        let ops = cluster.ops();
        let delete_idx = ops.iter().position(|op| *op == Op::Delete("virt-default/old".into())).unwrap();
        let alpha_idx = ops.iter().position(|op| *op == Op::Apply("virt-default/alpha".into())).unwrap();
        let zeta_idx = ops.iter().position(|op| *op == Op::Apply("virt-default/zeta".into())).unwrap();

        assert!(delete_idx < alpha_idx, "deletes run before applies within an event");
        assert!(alpha_idx < zeta_idx, "applies run in name order");
    }

    #[tokio::test(start_paused = true)]
    async fn test_namespaces_created_lazily_once() {
        let store = store_with_events(vec![TimelineEvent {
            ts: 0,
            applied_objs: vec![deployment("default", "a"), deployment("default", "b"), deployment("other", "c")],
            deleted_objs: vec![],
        }]);
        let (mut engine, cluster) = engine(store, Default::default());
        let (_tx, rx) = shutdown_channel();
        engine.run(rx).await.unwrap();

        let ns_creates: Vec<_> = cluster
            .ops()
            .into_iter()
            .filter(|op| matches!(op, Op::EnsureNamespace(_)))
            .collect();
        assert_eq!(
            ns_creates,
            vec![
                Op::EnsureNamespace("virt-default".into()),
                Op::EnsureNamespace("virt-other".into())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_virtualized_objects_carry_simulation_metadata() {
        let store = store_with_events(vec![TimelineEvent {
            ts: 0,
            applied_objs: vec![deployment("default", "a")],
            deleted_objs: vec![],
        }]);

        let settings = ReplaySettings {
            sim_name: "sim-1".into(),
            root_name: "sim-1-root".into(),
            virtual_ns_prefix: "virt".into(),
        };
        let eng = ReplayEngine::new(StubCluster::default(), store, settings, Default::default());

        let mut root = SimulationRoot::new("sim-1-root", Default::default());
        root.metadata.uid = Some("root-uid".into());
        let vobj = eng.virtualize(&deployment("default", "a"), &root).unwrap();

        assert_eq!(vobj.namespace().as_deref(), Some("virt-default"));
        assert_eq!(vobj.labels()["simulation"], "sim-1");
        assert!(vobj.data.get("status").is_none());

        let template = &vobj.data["spec"]["template"];
        assert_eq!(template["metadata"]["annotations"][SOURCE_NAMESPACE_ANNOTATION_KEY], "default");
        assert!(template["spec"]["containers"][0].get("ports").is_none());

        let owners = vobj.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners[0].name, "sim-1-root");
        assert_eq!(owners[0].block_owner_deletion, Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_until_success() {
        let store = store_with_events(vec![TimelineEvent {
            ts: 0,
            applied_objs: vec![deployment("default", "a")],
            deleted_objs: vec![],
        }]);
        let (mut engine, cluster) = engine(store, Default::default());
        *cluster.transient_failures_remaining.lock().unwrap() = 2;

        let (_tx, rx) = shutdown_channel();
        engine.run(rx).await.unwrap();

        assert_eq!(engine.state(), ReplayState::Done);
        assert!(cluster.ops().contains(&Op::Apply("virt-default/a".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_drains_and_fails() {
        let store = store_with_events(vec![TimelineEvent {
            ts: 0,
            applied_objs: vec![deployment("default", "a")],
            deleted_objs: vec![],
        }]);
        let (mut engine, cluster) = engine(store, Default::default());
        *cluster.fail_applies_with.lock().unwrap() = Some(ApplyError::Permanent("validation rejected".into()));

        let (_tx, rx) = shutdown_channel();
        let res = engine.run(rx).await;

        assert!(res.is_err());
        assert_eq!(engine.state(), ReplayState::Failed);
        assert!(engine.failure().unwrap().contains("validation rejected"));
        assert!(*cluster.root_deleted.lock().unwrap(), "failed runs still drain");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_moves_to_draining() {
        let store = store_with_events(vec![
            TimelineEvent { ts: 0, applied_objs: vec![deployment("default", "a")], deleted_objs: vec![] },
            TimelineEvent { ts: 3600, applied_objs: vec![deployment("default", "b")], deleted_objs: vec![] },
        ]);
        let (mut engine, cluster) = engine(store, Default::default());
        let (tx, rx) = shutdown_channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let _ = tx.send(());
        });

        engine.run(rx).await.unwrap();

        assert_eq!(engine.state(), ReplayState::Done);
        assert!(*cluster.root_deleted.lock().unwrap());
        assert!(
            !cluster.ops().contains(&Op::Apply("virt-default/b".into())),
            "cancelled before the second event was due"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repetitions_replay_the_whole_trace() {
        let store = store_with_events(vec![TimelineEvent {
            ts: 0,
            applied_objs: vec![deployment("default", "a")],
            deleted_objs: vec![],
        }]);
        let (mut engine, cluster) = engine(store, ReplayControls { repetitions: 3, ..Default::default() });
        let (_tx, rx) = shutdown_channel();
        engine.run(rx).await.unwrap();

        let applies = cluster.ops().iter().filter(|op| matches!(op, Op::Apply(_))).count();
        assert_eq!(applies, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_speed_factor_is_rejected() {
        let store = store_with_events(vec![TimelineEvent::at(0)]);
        let (mut engine, _cluster) = engine(store, ReplayControls { speed_factor: 0.0, ..Default::default() });
        let (_tx, rx) = shutdown_channel();

        assert!(engine.run(rx).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_holds_state_before_drain() {
        let store = store_with_events(vec![TimelineEvent {
            ts: 0,
            applied_objs: vec![deployment("default", "a")],
            deleted_objs: vec![],
        }]);
        let (mut engine, cluster) = engine(
            store,
            ReplayControls { duration: Some(Duration::from_secs(60)), ..Default::default() },
        );
        let (_tx, rx) = shutdown_channel();

        let start = Instant::now();
        engine.run(rx).await.unwrap();

        assert!(Instant::now() - start >= Duration::from_secs(60));
        assert!(*cluster.root_deleted.lock().unwrap());
    }
}
