//! Dynamic watches over configured kinds
//!
//! One task per tracked kind. Kinds are only known at runtime, so the watch
//! runs over `DynamicObject`s. The kube watcher resubscribes from the last
//! seen resource version on its own; when it is forced into a full relist,
//! the listing is handed to the store as one `Relisted` command and the
//! store diffs it against the kind index.

use futures::StreamExt;
use kube::api::DynamicObject;
use kube::runtime::watcher::{self, watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::k8s::KindId;
use crate::observability::RecorderMetrics;
use crate::store::{StoreCommand, StoreHandle};

pub struct KindWatcher {
    kind: KindId,
    api: kube::Api<DynamicObject>,
    store: StoreHandle,
    metrics: RecorderMetrics,
}

impl KindWatcher {
    pub fn new(kind: KindId, api: kube::Api<DynamicObject>, store: StoreHandle) -> KindWatcher {
        KindWatcher {
            kind,
            api,
            store,
            metrics: RecorderMetrics::new(),
        }
    }

    /// Run until shutdown. `ready` fires once after the first complete list.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>, ready: mpsc::Sender<()>) {
        info!(kind = %self.kind, "starting kind watcher");

        let mut stream = std::pin::pin!(watcher(self.api.clone(), watcher::Config::default()));
        let mut relist: Vec<DynamicObject> = vec![];
        let mut announced_ready = false;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(kind = %self.kind, "kind watcher shutting down");
                    break;
                }
                maybe_event = stream.next() => {
                    let Some(event) = maybe_event else { break };
                    match event {
                        Ok(watcher::Event::Apply(obj)) => {
                            self.store.submit(StoreCommand::Applied { obj, ts: now_ts() });
                        }
                        Ok(watcher::Event::Delete(obj)) => {
                            self.store.submit(StoreCommand::Deleted { obj, ts: now_ts() });
                        }
                        Ok(watcher::Event::Init) => relist.clear(),
                        Ok(watcher::Event::InitApply(obj)) => relist.push(obj),
                        Ok(watcher::Event::InitDone) => {
                            self.store.submit(StoreCommand::Relisted {
                                kind: self.kind.clone(),
                                objs: std::mem::take(&mut relist),
                                ts: now_ts(),
                            });
                            if !announced_ready {
                                announced_ready = true;
                                let _ = ready.send(()).await;
                            }
                        }
                        Err(err) => {
                            // the watcher retries with its own capped backoff;
                            // all we do is count and log
                            warn!(kind = %self.kind, error = %err, "watch stream error, resubscribing");
                            self.metrics.inc_watch_restarts(&self.kind.to_string());
                        }
                    }
                }
            }
        }
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
