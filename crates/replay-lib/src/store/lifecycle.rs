//! Pod lifecycle table
//!
//! Lifetimes are indexed by *owner* rather than by pod name, because
//! simulated pods do not keep their recorded names. Under each owner, the
//! intervals are bucketed by the hash of the pod template the pod was
//! instantiated from; an owner with several distinct templates (a custom
//! resource fanning out different pod shapes, a deployment mid-rollout)
//! keeps a separate interval list per shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::k8s::KindId;
use crate::models::PodInterval;
use crate::store::KindIndex;

/// Interval lists bucketed by pod-template hash.
pub type IntervalsByTemplate = HashMap<u64, Vec<PodInterval>>;

/// The owner key: tracked kind plus `namespace/name`.
pub type OwnerKey = (KindId, String);

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LifecycleTable {
    owners: HashMap<OwnerKey, IntervalsByTemplate>,
}

impl LifecycleTable {
    pub fn new() -> LifecycleTable {
        LifecycleTable::default()
    }

    pub fn from_owners(owners: HashMap<OwnerKey, IntervalsByTemplate>) -> LifecycleTable {
        LifecycleTable { owners }
    }

    pub fn into_owners(self) -> HashMap<OwnerKey, IntervalsByTemplate> {
        self.owners
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of owners with recorded lifecycles.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Open a new interval: a pod of this shape started running at `ts`.
    pub fn record_start(&mut self, owner: OwnerKey, template_hash: u64, ts: i64) {
        debug!(owner = %format_owner(&owner), template_hash, ts, "pod started");
        self.owners
            .entry(owner)
            .or_default()
            .entry(template_hash)
            .or_default()
            .push(PodInterval::open(ts));
    }

    /// Close the most recent open interval for the key. If nothing is open
    /// (the end event arrived before the start, or the start was dropped), a
    /// zero-length closed interval is recorded instead. `end_ts` is clamped
    /// so that no record ever closes before it started.
    pub fn record_end(&mut self, owner: OwnerKey, template_hash: u64, ts: i64) {
        debug!(owner = %format_owner(&owner), template_hash, ts, "pod finished");
        let intervals = self.owners.entry(owner).or_default().entry(template_hash).or_default();

        match intervals.iter_mut().rev().find(|iv| iv.is_open()) {
            Some(open) => open.end_ts = Some(ts.max(open.start_ts)),
            None => intervals.push(PodInterval::closed(ts, ts)),
        }
    }

    pub fn intervals_for(&self, owner: &OwnerKey, template_hash: u64) -> Option<&Vec<PodInterval>> {
        self.owners.get(owner)?.get(&template_hash)
    }

    /// The longest closed interval observed for the key, used as the
    /// representative lifetime of simulated pods.
    pub fn longest_duration(&self, owner: &OwnerKey, template_hash: u64) -> Option<i64> {
        self.intervals_for(owner, template_hash)?
            .iter()
            .filter_map(PodInterval::duration)
            .max()
    }

    /// Reduce the table to owners present in `index`, keeping only intervals
    /// that overlap `[start_ts, end_ts]` and clamping them to the window.
    pub fn windowed(&self, start_ts: i64, end_ts: i64, index: &KindIndex) -> LifecycleTable {
        let owners = self
            .owners
            .iter()
            .filter(|((kind, ns_name), _)| index.contains(kind, ns_name))
            .filter_map(|(owner, by_template)| {
                let filtered: IntervalsByTemplate = by_template
                    .iter()
                    .filter_map(|(hash, intervals)| {
                        let kept: Vec<_> = intervals
                            .iter()
                            .filter(|iv| iv.overlaps(start_ts, end_ts))
                            .map(|iv| iv.clamped(start_ts, end_ts))
                            .collect();
                        (!kept.is_empty()).then_some((*hash, kept))
                    })
                    .collect();
                (!filtered.is_empty()).then(|| (owner.clone(), filtered))
            })
            .collect();

        LifecycleTable { owners }
    }
}

fn format_owner(owner: &OwnerKey) -> String {
    format!("{}:{}", owner.0, owner.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerKey {
        (KindId::new("apps", "v1", "Deployment"), "default/web".into())
    }

    #[test]
    fn test_start_then_end() {
        let mut table = LifecycleTable::new();
        table.record_start(owner(), 7, 10);
        table.record_end(owner(), 7, 40);

        assert_eq!(table.intervals_for(&owner(), 7).unwrap(), &vec![PodInterval::closed(10, 40)]);
    }

    #[test]
    fn test_sibling_pods_accumulate() {
        let mut table = LifecycleTable::new();
        table.record_start(owner(), 7, 10);
        table.record_end(owner(), 7, 40);
        table.record_start(owner(), 7, 50);

        let intervals = table.intervals_for(&owner(), 7).unwrap();
        assert_eq!(intervals, &vec![PodInterval::closed(10, 40), PodInterval::open(50)]);
    }

    #[test]
    fn test_end_without_start_opens_and_closes() {
        let mut table = LifecycleTable::new();
        table.record_end(owner(), 7, 25);
        assert_eq!(table.intervals_for(&owner(), 7).unwrap(), &vec![PodInterval::closed(25, 25)]);
    }

    #[test]
    fn test_end_never_precedes_start() {
        let mut table = LifecycleTable::new();
        table.record_start(owner(), 7, 30);
        table.record_end(owner(), 7, 20);

        let intervals = table.intervals_for(&owner(), 7).unwrap();
        assert_eq!(intervals[0].end_ts, Some(30));
        assert!(intervals[0].duration().unwrap() >= 0);
    }

    #[test]
    fn test_end_closes_most_recent_open() {
        let mut table = LifecycleTable::new();
        table.record_start(owner(), 7, 10);
        table.record_start(owner(), 7, 20);
        table.record_end(owner(), 7, 35);

        let intervals = table.intervals_for(&owner(), 7).unwrap();
        assert_eq!(intervals[0], PodInterval::open(10));
        assert_eq!(intervals[1], PodInterval::closed(20, 35));
    }

    #[test]
    fn test_longest_duration() {
        let mut table = LifecycleTable::new();
        table.record_start(owner(), 7, 0);
        table.record_end(owner(), 7, 30);
        table.record_start(owner(), 7, 100);
        table.record_end(owner(), 7, 250);
        table.record_start(owner(), 7, 300); // still running, ignored

        assert_eq!(table.longest_duration(&owner(), 7), Some(150));
        assert_eq!(table.longest_duration(&owner(), 8), None);
    }

    #[test]
    fn test_windowed_filters_and_clamps() {
        let mut index = KindIndex::new();
        index.insert(owner().0, owner().1, 1);

        let mut table = LifecycleTable::new();
        table.record_start(owner(), 7, 10);
        table.record_end(owner(), 7, 90);
        table.record_start(owner(), 7, 200);
        table.record_end(owner(), 7, 300); // outside the window

        let gone = (KindId::new("apps", "v1", "Deployment"), "default/other".to_string());
        table.record_start(gone.clone(), 9, 20);

        let windowed = table.windowed(0, 100, &index);
        assert_eq!(windowed.intervals_for(&owner(), 7).unwrap(), &vec![PodInterval::closed(10, 90)]);
        assert!(windowed.intervals_for(&gone, 9).is_none(), "owners outside the index are dropped");
    }
}
