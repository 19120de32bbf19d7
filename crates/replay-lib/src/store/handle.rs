//! Serialized writer access to the store
//!
//! All mutations funnel through one task that owns the `TimelineStore`;
//! watchers and the export endpoint only ever hold a `StoreHandle`. Committed
//! mutations therefore have a total order consistent with enqueue order, and
//! exports see a consistent snapshot without blocking the writer for long.
//!
//! The watch-side queue is bounded: if the store cannot keep up, events are
//! dropped with a log line and the drop point is recorded in the timeline as
//! a gap marker. Losing a watch event is preferable to stalling the fabric.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube::api::DynamicObject;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::{OwnerKey, TimelineStore};
use crate::errors::ExportError;
use crate::k8s::KindId;
use crate::observability::RecorderMetrics;

/// Upper bound on queued-but-uncommitted watch events.
const STORE_QUEUE_DEPTH: usize = 4096;

/// Sentinel meaning "no gap pending".
const NO_GAP: i64 = i64::MIN;

#[derive(Debug)]
pub enum StoreCommand {
    Applied { obj: DynamicObject, ts: i64 },
    Deleted { obj: DynamicObject, ts: i64 },
    Relisted { kind: KindId, objs: Vec<DynamicObject>, ts: i64 },
    PodStarted { owner: OwnerKey, template_hash: u64, ts: i64 },
    PodFinished { owner: OwnerKey, template_hash: u64, ts: i64 },
    Gap { ts: i64 },
    Snapshot { reply: oneshot::Sender<TimelineStore> },
}

#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    pending_gap: Arc<AtomicI64>,
    metrics: RecorderMetrics,
}

impl StoreHandle {
    /// Enqueue a watch-side mutation. Never blocks: if the queue is full the
    /// command is dropped and the drop point is remembered so a gap marker
    /// can be committed once the queue drains.
    pub fn submit(&self, cmd: StoreCommand) {
        let gap_ts = self.pending_gap.swap(NO_GAP, Ordering::AcqRel);
        if gap_ts != NO_GAP {
            if let Err(err) = self.tx.try_send(StoreCommand::Gap { ts: gap_ts }) {
                self.remember_drop(gap_ts, &err);
                // no room for the marker either, so there is none for cmd
                self.note_saturated(cmd);
                return;
            }
        }

        let ts = command_ts(&cmd).unwrap_or(NO_GAP);
        if let Err(err) = self.tx.try_send(cmd) {
            if ts != NO_GAP {
                self.remember_drop(ts, &err);
            }
        }
    }

    /// Take a consistent copy of the store, bounded by `timeout`.
    pub async fn snapshot(&self, timeout: Duration) -> Result<TimelineStore, ExportError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send_timeout(StoreCommand::Snapshot { reply: reply_tx }, timeout)
            .await
            .map_err(|_| ExportError::Unavailable("store writer queue saturated".into()))?;

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(store)) => Ok(store),
            _ => Err(ExportError::Unavailable("store writer did not respond".into())),
        }
    }

    fn remember_drop(&self, ts: i64, err: &mpsc::error::TrySendError<StoreCommand>) {
        warn!(ts, %err, "store queue saturated, dropping watch event");
        self.metrics.inc_store_dropped();
        self.pending_gap.fetch_max(ts, Ordering::AcqRel);
    }

    fn note_saturated(&self, cmd: StoreCommand) {
        if let Some(ts) = command_ts(&cmd) {
            self.metrics.inc_store_dropped();
            self.pending_gap.fetch_max(ts, Ordering::AcqRel);
        }
    }
}

fn command_ts(cmd: &StoreCommand) -> Option<i64> {
    match cmd {
        StoreCommand::Applied { ts, .. }
        | StoreCommand::Deleted { ts, .. }
        | StoreCommand::Relisted { ts, .. }
        | StoreCommand::PodStarted { ts, .. }
        | StoreCommand::PodFinished { ts, .. }
        | StoreCommand::Gap { ts } => Some(*ts),
        StoreCommand::Snapshot { .. } => None,
    }
}

/// Spawn the writer task. The task runs until every handle is dropped, then
/// resolves to the final store state so the caller can persist it.
pub fn spawn_store_task(store: TimelineStore) -> (StoreHandle, JoinHandle<TimelineStore>) {
    let (tx, rx) = mpsc::channel(STORE_QUEUE_DEPTH);
    let handle = StoreHandle {
        tx,
        pending_gap: Arc::new(AtomicI64::new(NO_GAP)),
        metrics: RecorderMetrics::new(),
    };
    let task = tokio::spawn(run_store_task(store, rx));
    (handle, task)
}

async fn run_store_task(mut store: TimelineStore, mut rx: mpsc::Receiver<StoreCommand>) -> TimelineStore {
    let metrics = RecorderMetrics::new();
    while let Some(cmd) = rx.recv().await {
        let res = match cmd {
            StoreCommand::Applied { obj, ts } => {
                metrics.inc_events_recorded("applied");
                store.observe_applied(&obj, ts)
            },
            StoreCommand::Deleted { obj, ts } => {
                metrics.inc_events_recorded("deleted");
                store.observe_deleted(&obj, ts)
            },
            StoreCommand::Relisted { kind, objs, ts } => store.reconcile(&kind, &objs, ts),
            StoreCommand::PodStarted { owner, template_hash, ts } => {
                store.record_pod_start(owner, template_hash, ts);
                Ok(())
            },
            StoreCommand::PodFinished { owner, template_hash, ts } => {
                store.record_pod_end(owner, template_hash, ts);
                Ok(())
            },
            StoreCommand::Gap { ts } => {
                store.record_gap(ts);
                Ok(())
            },
            StoreCommand::Snapshot { reply } => {
                // encoding happens on the requester's side, outside this task
                let _ = reply.send(store.clone());
                Ok(())
            },
        };

        if let Err(err) = res {
            error!(error = %err, "store mutation failed");
        }
    }

    store
}

#[cfg(test)]
mod tests {
    use kube::api::TypeMeta;
    use serde_json::json;

    use super::*;
    use crate::config::TrackerConfig;

    fn deployment(name: &str) -> DynamicObject {
        let mut obj = DynamicObject {
            types: Some(TypeMeta { api_version: "apps/v1".into(), kind: "Deployment".into() }),
            metadata: Default::default(),
            data: json!({"spec": {"replicas": 1}}),
        };
        obj.metadata.namespace = Some("default".into());
        obj.metadata.name = Some(name.into());
        obj
    }

    #[tokio::test]
    async fn test_mutations_commit_in_order() {
        let (handle, task) = spawn_store_task(TimelineStore::new(TrackerConfig::default()));

        handle.submit(StoreCommand::Applied { obj: deployment("a"), ts: 10 });
        handle.submit(StoreCommand::Applied { obj: deployment("b"), ts: 20 });
        handle.submit(StoreCommand::Deleted { obj: deployment("a"), ts: 30 });

        let snap = handle.snapshot(Duration::from_secs(1)).await.unwrap();
        assert_eq!(snap.events().len(), 3);
        assert_eq!(snap.events()[0].ts, 10);
        assert_eq!(snap.events()[2].deleted_objs.len(), 1);

        drop(handle);
        let final_store = task.await.unwrap();
        assert_eq!(final_store.events().len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_is_consistent_copy() {
        let (handle, _task) = spawn_store_task(TimelineStore::new(TrackerConfig::default()));
        handle.submit(StoreCommand::Applied { obj: deployment("a"), ts: 10 });

        let snap = handle.snapshot(Duration::from_secs(1)).await.unwrap();
        handle.submit(StoreCommand::Applied { obj: deployment("b"), ts: 20 });

        let snap2 = handle.snapshot(Duration::from_secs(1)).await.unwrap();
        assert_eq!(snap.events().len(), 1, "earlier snapshot does not see later writes");
        assert_eq!(snap2.events().len(), 2);
    }

    #[tokio::test]
    async fn test_pod_lifecycle_commands() {
        let (handle, _task) = spawn_store_task(TimelineStore::new(TrackerConfig::default()));
        let owner = (KindId::new("apps", "v1", "Deployment"), "default/web".to_string());

        handle.submit(StoreCommand::PodStarted { owner: owner.clone(), template_hash: 7, ts: 10 });
        handle.submit(StoreCommand::PodFinished { owner: owner.clone(), template_hash: 7, ts: 40 });

        let snap = handle.snapshot(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            snap.lifecycles().intervals_for(&owner, 7).unwrap(),
            &vec![crate::models::PodInterval::closed(10, 40)]
        );
    }
}
