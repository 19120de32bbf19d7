//! Export window computation
//!
//! An export reduces the full in-memory timeline to a self-consistent
//! `[start_ts, end_ts]` window:
//!
//! 1. everything alive at `start_ts` (exclusions applied) becomes one
//!    synthetic applied-event at `start_ts`;
//! 2. real events in `(start_ts, end_ts]` are emitted, minus excluded
//!    objects;
//! 3. objects that were present at the start but whose later in-window form
//!    matched an exclusion get a synthetic delete at `end_ts`, so the
//!    exported prefix never strands them as live;
//! 4. the kind index is rebuilt from the emitted events alone.

use std::collections::{BTreeMap, HashSet};

use kube::api::DynamicObject;

use crate::canonical;
use crate::k8s::{deletion_stub, selector_matches, KindId, ResourceIdentityExt};
use crate::models::{ExportFilters, TimelineEvent};
use crate::store::KindIndex;

type Key = (KindId, String);

/// Whether an object is excluded from an export.
pub fn matches_filters(obj: &DynamicObject, filters: &ExportFilters) -> anyhow::Result<bool> {
    if let Some(ns) = &obj.metadata.namespace {
        if filters.excluded_namespaces.contains(ns) {
            return Ok(true);
        }
    }

    if filters.exclude_daemonsets {
        if let Some(types) = &obj.types {
            if types.kind == "DaemonSet" {
                return Ok(true);
            }
        }
    }

    let labels = obj.metadata.labels.clone().unwrap_or_default();
    for sel in &filters.excluded_labels {
        if selector_matches(&labels, sel)? {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Reduce the timeline to the requested window. Returns the exported events
/// and the kind index of the exported prefix.
pub(crate) fn collect_window(
    events: &[TimelineEvent],
    start_ts: i64,
    end_ts: i64,
    filters: &ExportFilters,
) -> anyhow::Result<(Vec<TimelineEvent>, KindIndex)> {
    // BTreeMap so the synthetic start event applies in a stable (kind, name)
    // order during replay
    let mut at_start: BTreeMap<Key, DynamicObject> = BTreeMap::new();
    let mut window_events: Vec<TimelineEvent> = vec![];

    // Keys whose most recent in-window applied form matched an exclusion and
    // that have not since been deleted in the output
    let mut became_excluded: HashSet<Key> = HashSet::new();

    for evt in events {
        if evt.ts > end_ts {
            break;
        }
        let in_prefix = evt.ts <= start_ts;
        let mut out = TimelineEvent::at(evt.ts);

        for obj in &evt.applied_objs {
            let key = (KindId::of(obj)?, obj.namespaced_name());
            let excluded = matches_filters(obj, filters)?;

            if in_prefix {
                if excluded {
                    at_start.remove(&key);
                } else {
                    at_start.insert(key, obj.clone());
                }
            } else if excluded {
                if at_start.contains_key(&key) {
                    became_excluded.insert(key);
                }
            } else {
                became_excluded.remove(&key);
                out.applied_objs.push(obj.clone());
            }
        }

        for obj in &evt.deleted_objs {
            let key = (KindId::of(obj)?, obj.namespaced_name());

            if in_prefix {
                at_start.remove(&key);
            } else if !matches_filters(obj, filters)? {
                became_excluded.remove(&key);
                out.deleted_objs.push(obj.clone());
            }
        }

        if !in_prefix && !out.is_empty() {
            window_events.push(out);
        }
    }

    let mut exported = vec![TimelineEvent {
        ts: start_ts,
        applied_objs: at_start.values().cloned().collect(),
        deleted_objs: vec![],
    }];
    exported.extend(window_events);

    if !became_excluded.is_empty() {
        let mut stubs: Vec<_> = became_excluded.into_iter().collect();
        stubs.sort();
        let deleted_objs: Vec<DynamicObject> =
            stubs.iter().map(|(kind, ns_name)| deletion_stub(kind, ns_name)).collect();
        match exported.last_mut() {
            Some(evt) if evt.ts == end_ts => evt.deleted_objs.extend(deleted_objs),
            _ => exported.push(TimelineEvent { ts: end_ts, applied_objs: vec![], deleted_objs }),
        }
    }

    // Rebuild the index from exactly what was emitted, so it reflects the
    // exported prefix and nothing else
    let mut index = KindIndex::new();
    for evt in &exported {
        for obj in &evt.applied_objs {
            index.insert(KindId::of(obj)?, obj.namespaced_name(), canonical::shape_hash(obj));
        }
        for obj in &evt.deleted_objs {
            index.remove(&KindId::of(obj)?, &obj.namespaced_name());
        }
    }

    Ok((exported, index))
}
