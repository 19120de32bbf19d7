//! Watch fabric
//!
//! Spawns one long-running watch task per configured kind plus the global
//! pod watch, all feeding the store writer through its bounded handle. Each
//! watcher signals readiness after its first complete list; the fabric is
//! ready (and the health registry says so) once they all have.

mod kinds;
mod owners;
mod pods;

pub use self::kinds::KindWatcher;
pub use self::owners::{resolve_pod_chain, ApiOwnerLookup, OwnerLink, OwnerLookup, OwnershipResolver};
pub use self::pods::PodWatcher;

use k8s_openapi::api::core::v1 as corev1;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::info;

use crate::config::TrackerConfig;
use crate::health::{Component, HealthMonitor};
use crate::k8s::ApiCache;
use crate::store::StoreHandle;

pub struct WatchFabric {
    tasks: JoinSet<()>,
    ready_rx: mpsc::Receiver<()>,
    watcher_count: usize,
}

impl WatchFabric {
    /// Open every configured watch. Fails fast if a configured kind is not
    /// served by the cluster, which is a configuration error.
    pub async fn start(
        client: kube::Client,
        config: TrackerConfig,
        store: StoreHandle,
        shutdown: &broadcast::Sender<()>,
    ) -> anyhow::Result<WatchFabric> {
        let mut apis = ApiCache::new(client.clone());
        let watcher_count = config.tracked_objects.len() + 1;
        let (ready_tx, ready_rx) = mpsc::channel(watcher_count);

        let mut tasks = JoinSet::new();
        for kind in config.tracked_objects.keys() {
            let (api, _) = apis.cluster_api(kind).await?;
            let watcher = KindWatcher::new(kind.clone(), api.clone(), store.clone());
            tasks.spawn(watcher.run(shutdown.subscribe(), ready_tx.clone()));
        }

        let resolver = OwnershipResolver::new(ApiOwnerLookup::new(client.clone()));
        let pod_watcher = PodWatcher::new(config, resolver, store);
        let pod_api: kube::Api<corev1::Pod> = kube::Api::all(client);
        tasks.spawn(pod_watcher.run(pod_api, shutdown.subscribe(), ready_tx));

        Ok(WatchFabric { tasks, ready_rx, watcher_count })
    }

    /// Block until every watcher has completed its initial list, then mark
    /// the fabric synced.
    pub async fn wait_ready(&mut self, monitor: &HealthMonitor) {
        for _ in 0..self.watcher_count {
            let _ = self.ready_rx.recv().await;
        }
        info!(watchers = self.watcher_count, "watch fabric ready");
        monitor.mark_up(Component::WatchFabric).await;
    }

    /// Wait for all watch tasks to wind down after shutdown was signalled.
    pub async fn join(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }
}
