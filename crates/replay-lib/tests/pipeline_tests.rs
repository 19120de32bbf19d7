//! End-to-end pipeline tests: record into the store, export a window,
//! decode the artifact, and replay it against a stub cluster.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{DynamicObject, TypeMeta};
use replay_lib::canonical;
use replay_lib::errors::ApplyError;
use replay_lib::k8s::{KindId, SimulationRoot};
use replay_lib::replay::ClusterApplier;
use replay_lib::store::OwnerKey;
use replay_lib::{
    codec, PodInterval, ReplayControls, ReplayEngine, ReplaySettings, ReplayState, TimelineStore,
    TrackerConfig,
};
use serde_json::json;
use tokio::sync::broadcast;

fn tracker_config() -> TrackerConfig {
    serde_yaml::from_str(
        "trackedObjects:\n  apps/v1.Deployment:\n    podSpecTemplatePaths: [\"/spec/template\"]\n    trackLifecycle: true\n",
    )
    .unwrap()
}

fn deployment(ns: &str, name: &str, replicas: i64) -> DynamicObject {
    let mut obj = DynamicObject {
        types: Some(TypeMeta {
            api_version: "apps/v1".into(),
            kind: "Deployment".into(),
        }),
        metadata: Default::default(),
        data: json!({
            "spec": {
                "replicas": replicas,
                "template": {"spec": {"containers": [{"name": "app", "image": "app:1"}]}},
            },
            "status": {"readyReplicas": replicas},
        }),
    };
    obj.metadata.namespace = Some(ns.into());
    obj.metadata.name = Some(name.into());
    obj.metadata.resource_version = Some("123".into());
    obj.metadata.uid = Some("uid-123".into());
    obj
}

fn depl_kind() -> KindId {
    KindId::new("apps", "v1", "Deployment")
}

#[derive(Clone, Default)]
struct RecordingCluster {
    applies: Arc<Mutex<Vec<String>>>,
    deletes: Arc<Mutex<Vec<String>>>,
    namespaces: Arc<Mutex<Vec<String>>>,
    root_deleted: Arc<Mutex<bool>>,
}

#[async_trait]
impl ClusterApplier for RecordingCluster {
    async fn ensure_root(&self, name: &str, _sim_name: &str) -> anyhow::Result<SimulationRoot> {
        let mut root = SimulationRoot::new(name, Default::default());
        root.metadata.uid = Some("root-uid".into());
        Ok(root)
    }

    async fn ensure_namespace(&self, namespace: &str, _root: &SimulationRoot) -> Result<(), ApplyError> {
        self.namespaces.lock().unwrap().push(namespace.into());
        Ok(())
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<(), ApplyError> {
        let ns = obj.metadata.namespace.clone().unwrap_or_default();
        let name = obj.metadata.name.clone().unwrap_or_default();
        self.applies.lock().unwrap().push(format!("{ns}/{name}"));
        Ok(())
    }

    async fn delete(&self, _kind: &KindId, namespace: &str, name: &str) -> Result<(), ApplyError> {
        self.deletes.lock().unwrap().push(format!("{namespace}/{name}"));
        Ok(())
    }

    async fn delete_root(&self, _name: &str) -> anyhow::Result<bool> {
        *self.root_deleted.lock().unwrap() = true;
        Ok(true)
    }
}

/// Record two deployments and a pod lifecycle, export a window, and verify
/// the decoded artifact matches what went in.
#[test]
fn test_record_export_decode() {
    let mut store = TimelineStore::new(tracker_config());
    store.observe_applied(&deployment("default", "web", 2), 100).unwrap();
    store.observe_applied(&deployment("default", "api", 1), 110).unwrap();
    store.observe_deleted(&deployment("default", "api", 1), 150).unwrap();

    let owner: OwnerKey = (depl_kind(), "default/web".into());
    store.record_pod_start(owner.clone(), 77, 105);
    store.record_pod_end(owner.clone(), 77, 140);

    let data = store.export(100, 200, &Default::default()).unwrap();
    let doc = codec::decode(&data).unwrap();

    // ts<=100 flattens into the synthetic start event; the rest play live
    assert_eq!(doc.events.len(), 3);
    assert_eq!(doc.events[0].ts, 100);
    assert_eq!(doc.events[0].applied_objs.len(), 1);
    assert_eq!(doc.events[1].ts, 110);
    assert_eq!(doc.events[2].ts, 150);
    assert_eq!(doc.events[2].deleted_objs.len(), 1);

    // only web survives to the end of the window
    assert_eq!(doc.index.len(), 1);
    let web = &doc.events[0].applied_objs[0];
    assert_eq!(doc.index.get(&depl_kind(), "default/web"), Some(canonical::shape_hash(web)));

    // canonicalization already happened on the way into the store
    assert!(web.metadata.resource_version.is_none());
    assert!(web.data.get("status").is_none());

    assert_eq!(doc.pod_lifecycles[&owner][&77u64], vec![PodInterval::closed(105, 140)]);
}

/// The full loop: a decoded export replays cleanly against a stub cluster,
/// into virtual namespaces, on the scaled clock.
#[tokio::test(start_paused = true)]
async fn test_exported_trace_replays() {
    let mut store = TimelineStore::new(tracker_config());
    store.observe_applied(&deployment("default", "web", 2), 100).unwrap();
    store.observe_applied(&deployment("payments", "worker", 1), 130).unwrap();
    store.observe_deleted(&deployment("default", "web", 2), 160).unwrap();

    let data = store.export(100, 200, &Default::default()).unwrap();
    let replay_store = TimelineStore::from_document(codec::decode(&data).unwrap(), None);

    let cluster = RecordingCluster::default();
    let settings = ReplaySettings {
        sim_name: "sim-e2e".into(),
        root_name: "sim-e2e-root".into(),
        virtual_ns_prefix: "virt".into(),
    };
    let controls = ReplayControls {
        speed_factor: 30.0,
        ..Default::default()
    };

    let mut engine = ReplayEngine::new(cluster.clone(), replay_store, settings, controls);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let start = tokio::time::Instant::now();
    engine.run(shutdown_rx).await.unwrap();

    assert_eq!(engine.state(), ReplayState::Done);

    // 60 seconds of trace at 30x is two seconds of wall clock
    let elapsed = tokio::time::Instant::now() - start;
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");

    assert_eq!(
        *cluster.applies.lock().unwrap(),
        vec!["virt-default/web".to_string(), "virt-payments/worker".to_string()]
    );
    assert_eq!(*cluster.deletes.lock().unwrap(), vec!["virt-default/web".to_string()]);
    assert_eq!(
        *cluster.namespaces.lock().unwrap(),
        vec!["virt-default".to_string(), "virt-payments".to_string()]
    );
    assert!(*cluster.root_deleted.lock().unwrap());
}

/// Hashes recorded in the trace line up with hashes recomputed from the
/// decoded objects, which is what lets the replay side identify shapes.
#[test]
fn test_hashes_are_stable_across_the_codec_boundary() {
    let mut store = TimelineStore::new(tracker_config());
    store.observe_applied(&deployment("default", "web", 2), 100).unwrap();

    // window starts at the apply timestamp, so the object lands in the
    // synthetic start event
    let data = store.export(100, 200, &Default::default()).unwrap();
    let doc = codec::decode(&data).unwrap();

    let recorded_hash = doc.index.get(&depl_kind(), "default/web").unwrap();
    let recomputed = canonical::shape_hash(&doc.events[0].applied_objs[0]);
    assert_eq!(recorded_hash, recomputed);

    // a differently-named deployment with the same shape hashes identically
    let mut other_store = TimelineStore::new(tracker_config());
    other_store.observe_applied(&deployment("default", "web-copy", 2), 300).unwrap();
    assert_eq!(
        other_store.live_hash(&depl_kind(), "default/web-copy"),
        Some(recorded_hash)
    );
}
