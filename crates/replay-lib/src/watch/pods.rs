//! Global pod watch and lifecycle extraction
//!
//! Clusters produce a lot of pod churn, so this watcher filters aggressively
//! before anything reaches the store: a pod only matters if its ownership
//! chain ends at a tracked kind with `trackLifecycle: true`. The
//! classification (owner key + template hash) is computed once per pod and
//! cached; after that, each status update is reduced to at most two store
//! commands over the pod's whole life: one start, one end.
//!
//! Start time is the earliest container start observed, not the pod's
//! creation timestamp (which includes time spent pending). A pod ends when
//! it reaches a terminal phase or disappears from the watch.

use std::collections::HashMap;

use futures::StreamExt;
use k8s_openapi::api::core::v1 as corev1;
use kube::runtime::watcher::{self, watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::owners::{resolve_pod_chain, OwnerLookup, OwnershipResolver};
use crate::canonical;
use crate::config::TrackerConfig;
use crate::k8s::{earliest_container_start, latest_container_end, pod_has_ended, ResourceIdentityExt};
use crate::observability::RecorderMetrics;
use crate::store::{OwnerKey, StoreCommand, StoreHandle};

/// Lifecycle bookkeeping state for one tracked pod.
#[derive(Clone, Debug)]
struct TrackedPod {
    owner: OwnerKey,
    template_hash: u64,
    start_ts: Option<i64>,
    finished: bool,
}

pub struct PodWatcher<L> {
    config: TrackerConfig,
    resolver: OwnershipResolver<L>,
    store: StoreHandle,
    metrics: RecorderMetrics,
    /// `None` marks pods classified as not-ours, so we never walk their
    /// ownership twice.
    pods: HashMap<String, Option<TrackedPod>>,
}

impl<L: OwnerLookup> PodWatcher<L> {
    pub fn new(config: TrackerConfig, resolver: OwnershipResolver<L>, store: StoreHandle) -> PodWatcher<L> {
        PodWatcher {
            config,
            resolver,
            store,
            metrics: RecorderMetrics::new(),
            pods: HashMap::new(),
        }
    }

    /// Run over the global pod watch until shutdown.
    pub async fn run(
        mut self,
        api: kube::Api<corev1::Pod>,
        mut shutdown: broadcast::Receiver<()>,
        ready: mpsc::Sender<()>,
    ) {
        info!("starting pod watcher");

        let mut stream = std::pin::pin!(watcher(api, watcher::Config::default()));
        let mut relist: Vec<corev1::Pod> = vec![];
        let mut announced_ready = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("pod watcher shutting down");
                    break;
                }
                maybe_event = stream.next() => {
                    let Some(event) = maybe_event else { break };
                    let now = now_ts();
                    match event {
                        Ok(watcher::Event::Apply(pod)) => self.handle_applied(&pod, now).await,
                        Ok(watcher::Event::Delete(pod)) => {
                            self.handle_deleted(&pod.namespaced_name(), now);
                        }
                        Ok(watcher::Event::Init) => relist.clear(),
                        Ok(watcher::Event::InitApply(pod)) => relist.push(pod),
                        Ok(watcher::Event::InitDone) => {
                            self.handle_relisted(std::mem::take(&mut relist), now).await;
                            if !announced_ready {
                                announced_ready = true;
                                let _ = ready.send(()).await;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "pod watch stream error, resubscribing");
                            self.metrics.inc_watch_restarts("v1.Pod");
                        }
                    }
                }
            }
        }
    }

    async fn handle_applied(&mut self, pod: &corev1::Pod, now: i64) {
        let ns_name = pod.namespaced_name();

        if !self.pods.contains_key(&ns_name) {
            match self.classify(pod).await {
                Ok(classified) => {
                    self.pods.insert(ns_name.clone(), classified);
                    self.update_tracked_gauge();
                },
                Err(err) => {
                    // ownership unresolved; drop this event, the next status
                    // update retries the walk
                    debug!(pod = %ns_name, error = %err, "dropping pod event");
                    return;
                },
            }
        }

        let Some(Some(tracked)) = self.pods.get_mut(&ns_name) else {
            return;
        };

        if tracked.start_ts.is_none() {
            if let Some(start_ts) = earliest_container_start(pod) {
                tracked.start_ts = Some(start_ts);
                self.store.submit(StoreCommand::PodStarted {
                    owner: tracked.owner.clone(),
                    template_hash: tracked.template_hash,
                    ts: start_ts,
                });
            }
        }

        if tracked.start_ts.is_some() && !tracked.finished && pod_has_ended(pod) {
            tracked.finished = true;
            let ts = latest_container_end(pod).unwrap_or(now);
            self.store.submit(StoreCommand::PodFinished {
                owner: tracked.owner.clone(),
                template_hash: tracked.template_hash,
                ts,
            });
        }
    }

    fn handle_deleted(&mut self, ns_name: &str, now: i64) {
        if let Some(Some(tracked)) = self.pods.remove(ns_name) {
            if tracked.start_ts.is_some() && !tracked.finished {
                // the deleted object is not guaranteed to carry final status,
                // so the receive time stands in for the finish time
                self.store.submit(StoreCommand::PodFinished {
                    owner: tracked.owner,
                    template_hash: tracked.template_hash,
                    ts: now,
                });
            }
        }
        self.update_tracked_gauge();
    }

    /// A relist replaces our view of the world: anything we were tracking
    /// that is no longer listed finished while the watch was down.
    async fn handle_relisted(&mut self, pods: Vec<corev1::Pod>, now: i64) {
        let listed: std::collections::HashSet<String> =
            pods.iter().map(|p| p.namespaced_name()).collect();

        let vanished: Vec<String> =
            self.pods.keys().filter(|k| !listed.contains(*k)).cloned().collect();
        for ns_name in vanished {
            self.handle_deleted(&ns_name, now);
        }

        for pod in &pods {
            self.handle_applied(pod, now).await;
        }
    }

    /// Walk the ownership chain; `Some` when the pod belongs to a tracked
    /// kind with lifecycle recording enabled.
    async fn classify(&mut self, pod: &corev1::Pod) -> anyhow::Result<Option<TrackedPod>> {
        let chain = resolve_pod_chain(&self.resolver, pod).await?;

        let Some(owner) = chain
            .iter()
            .find(|link| self.config.is_tracked(&link.kind) && self.config.tracks_lifecycle(&link.kind))
        else {
            return Ok(None);
        };

        let spec = serde_json::to_value(&pod.spec)?;
        Ok(Some(TrackedPod {
            owner: (owner.kind.clone(), owner.ns_name()),
            template_hash: canonical::pod_template_hash(&spec),
            start_ts: None,
            finished: false,
        }))
    }

    fn update_tracked_gauge(&self) {
        let tracked = self.pods.values().filter(|p| p.is_some()).count();
        self.metrics.set_pods_tracked(tracked as i64);
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
