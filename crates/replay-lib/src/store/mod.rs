//! In-memory object store: timeline, kind index, and pod lifecycle table
//!
//! The store is the single source of truth on the recording side. Watchers
//! feed it raw objects; it canonicalizes them, appends timeline events,
//! keeps the kind index consistent with the timeline prefix, and tracks pod
//! lifetimes by owner. Exports reduce it to a bounded window and encode the
//! result as a trace document.
//!
//! The store grows with the length of the recording; bounding memory is the
//! operator's job via the export window, not the store's.

mod export;
mod handle;
mod index;
mod lifecycle;

use kube::api::DynamicObject;
use serde::Serialize;
use tracing::{info, warn};

pub use self::export::matches_filters;
pub use self::handle::{spawn_store_task, StoreCommand, StoreHandle};
pub use self::index::KindIndex;
pub use self::lifecycle::{IntervalsByTemplate, LifecycleTable, OwnerKey};

use crate::canonical;
use crate::codec::{self, TraceDocument};
use crate::config::TrackerConfig;
use crate::errors::ExportError;
use crate::k8s::{deletion_stub, KindId, ResourceIdentityExt};
use crate::models::{ExportFilters, TimelineEvent, TraceAction};

#[derive(Clone, Debug, Default)]
pub struct TimelineStore {
    config: TrackerConfig,
    events: Vec<TimelineEvent>,
    index: KindIndex,
    lifecycles: LifecycleTable,
}

/// Point-in-time summary of the store, served on the status endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStats {
    /// Committed timeline events
    pub events: usize,
    /// Objects applied or deleted across the whole timeline
    pub timeline_entries: usize,
    /// Objects currently live in the kind index
    pub live_objects: usize,
    /// Owners with recorded pod lifecycles
    pub lifecycle_owners: usize,
    /// First event timestamp (Unix seconds)
    pub start_ts: Option<i64>,
    /// Last event timestamp (Unix seconds)
    pub end_ts: Option<i64>,
}

impl TimelineStore {
    pub fn new(config: TrackerConfig) -> TimelineStore {
        TimelineStore { config, ..Default::default() }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn lifecycles(&self) -> &LifecycleTable {
        &self.lifecycles
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn start_ts(&self) -> Option<i64> {
        self.events.first().map(|evt| evt.ts)
    }

    pub fn end_ts(&self) -> Option<i64> {
        self.events.last().map(|evt| evt.ts)
    }

    pub fn is_live(&self, kind: &KindId, ns_name: &str) -> bool {
        self.index.contains(kind, ns_name)
    }

    pub fn live_hash(&self, kind: &KindId, ns_name: &str) -> Option<u64> {
        self.index.get(kind, ns_name)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            events: self.events.len(),
            timeline_entries: self.events.iter().map(TimelineEvent::len).sum(),
            live_objects: self.index.len(),
            lifecycle_owners: self.lifecycles.len(),
            start_ts: self.start_ts(),
            end_ts: self.end_ts(),
        }
    }

    /// Canonicalize and record an applied object.
    ///
    /// An apply whose canonical hash matches the indexed hash is a no-op:
    /// periodic relists and status-only updates must not bloat the timeline.
    pub fn observe_applied(&mut self, obj: &DynamicObject, ts: i64) -> anyhow::Result<()> {
        self.observe_applied_inner(obj, ts, None)
    }

    fn observe_applied_inner(
        &mut self,
        obj: &DynamicObject,
        ts: i64,
        swapped_out_hash: Option<u64>,
    ) -> anyhow::Result<()> {
        let kind = KindId::of(obj)?;
        let mut obj = obj.clone();
        canonical::canonicalize_object(&mut obj, &self.config.template_paths_for(&kind))?;

        let ns_name = obj.namespaced_name();
        let new_hash = canonical::shape_hash(&obj);
        let old_hash = swapped_out_hash.or_else(|| self.index.get(&kind, &ns_name));

        if Some(new_hash) != old_hash {
            self.append_event(ts, obj, TraceAction::Applied);
        }
        self.index.insert(kind, ns_name, new_hash);
        Ok(())
    }

    /// Record a deletion and drop the key from the index.
    pub fn observe_deleted(&mut self, obj: &DynamicObject, ts: i64) -> anyhow::Result<()> {
        let kind = KindId::of(obj)?;
        let mut obj = obj.clone();
        canonical::canonicalize_object(&mut obj, &self.config.template_paths_for(&kind))?;

        let ns_name = obj.namespaced_name();
        self.append_event(ts, obj, TraceAction::Deleted);
        self.index.remove(&kind, &ns_name);
        Ok(())
    }

    /// Reconcile a full relist of one kind against the index, emitting
    /// synthetic applies for drifted objects and synthetic deletes for keys
    /// that vanished while the watch was down.
    pub fn reconcile(&mut self, kind: &KindId, objs: &[DynamicObject], ts: i64) -> anyhow::Result<()> {
        let mut previous = self.index.take_kind(kind);

        for obj in objs {
            let old_hash = previous.remove(&obj.namespaced_name());
            self.observe_applied_inner(obj, ts, old_hash)?;
        }

        for ns_name in previous.keys() {
            self.observe_deleted(&deletion_stub(kind, ns_name), ts)?;
        }
        Ok(())
    }

    pub fn record_pod_start(&mut self, owner: OwnerKey, template_hash: u64, ts: i64) {
        self.lifecycles.record_start(owner, template_hash, ts);
    }

    pub fn record_pod_end(&mut self, owner: OwnerKey, template_hash: u64, ts: i64) {
        self.lifecycles.record_end(owner, template_hash, ts);
    }

    /// Mark a point where watch events were dropped on the floor because the
    /// store could not keep up. The empty event keeps the gap visible in the
    /// exported timeline.
    pub fn record_gap(&mut self, ts: i64) {
        warn!(ts, "watch events were dropped; recording gap marker");
        self.events.push(TimelineEvent::at(self.clamp_ts(ts)));
    }

    /// Reduce the store to `[start_ts, end_ts]`, apply filters, and encode
    /// the result as a trace document.
    pub fn export(
        &self,
        start_ts: i64,
        end_ts: i64,
        filters: &ExportFilters,
    ) -> anyhow::Result<Vec<u8>> {
        if end_ts < start_ts {
            return Err(ExportError::InvalidRange { start_ts, end_ts }.into());
        }
        info!(start_ts, end_ts, ?filters, "exporting trace window");

        let (events, index) = export::collect_window(&self.events, start_ts, end_ts, filters)?;
        let lifecycles = self.lifecycles.windowed(start_ts, end_ts, &index);
        let num_events = events.len();

        let data = codec::encode(&TraceDocument {
            version: codec::TRACE_VERSION,
            config: self.config.clone(),
            events,
            index,
            pod_lifecycles: lifecycles.into_owners(),
        })?;

        info!(num_events, bytes = data.len(), "trace window exported");
        Ok(data)
    }

    /// Rebuild a store from a decoded trace document (the replay side).
    ///
    /// `clamp_duration_secs` optionally truncates the timeline that far past
    /// its first event; an empty terminator event keeps the driver playing
    /// until the clamp point.
    pub fn from_document(doc: TraceDocument, clamp_duration_secs: Option<i64>) -> TimelineStore {
        let mut events = doc.events;
        if let (Some(clamp), Some(first)) = (clamp_duration_secs, events.first().map(|e| e.ts)) {
            let cutoff = first + clamp;
            events.retain(|evt| evt.ts < cutoff);
            events.push(TimelineEvent::at(cutoff));
        }

        info!(num_events = events.len(), "trace loaded");
        TimelineStore {
            config: doc.config,
            events,
            index: doc.index,
            lifecycles: LifecycleTable::from_owners(doc.pod_lifecycles),
        }
    }

    fn clamp_ts(&self, ts: i64) -> i64 {
        self.events.last().map_or(ts, |last| ts.max(last.ts))
    }

    fn append_event(&mut self, ts: i64, obj: DynamicObject, action: TraceAction) {
        let ts = self.clamp_ts(ts);
        info!(
            ts,
            action = ?action,
            kind = %obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("<unknown>"),
            object = %obj.namespaced_name(),
            "recording event"
        );

        match self.events.last_mut() {
            Some(evt) if evt.ts == ts => match action {
                TraceAction::Applied => {
                    // within one timestamp, a later write replaces an earlier
                    // one for the same key
                    evt.applied_objs
                        .retain(|o| o.types != obj.types || o.namespaced_name() != obj.namespaced_name());
                    evt.applied_objs.push(obj);
                },
                TraceAction::Deleted => evt.deleted_objs.push(obj),
            },
            _ => {
                let mut evt = TimelineEvent::at(ts);
                match action {
                    TraceAction::Applied => evt.applied_objs.push(obj),
                    TraceAction::Deleted => evt.deleted_objs.push(obj),
                }
                self.events.push(evt);
            },
        }
    }
}
