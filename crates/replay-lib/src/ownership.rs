//! Driver-side ownership tracker
//!
//! Holds the recorded pod lifecycle table and answers one question for the
//! admission mutator: how long should a simulated pod of this shape, owned
//! by this recorded object, be allowed to live?
//!
//! The representative TTL is the longest closed interval observed for the
//! (owner, template-hash) key: an upper bound on the recorded lifetimes, so
//! a simulated pod never dies earlier than its longest-lived recorded
//! sibling. Siblings admitted in sequence step through the recorded
//! intervals in launch order, falling back to the representative value when
//! an interval is still open or the sequence runs past the recording.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::store::{LifecycleTable, OwnerKey};

pub struct OwnershipTracker {
    lifecycles: LifecycleTable,
    admitted: Mutex<HashMap<(OwnerKey, u64), usize>>,
}

impl OwnershipTracker {
    pub fn new(lifecycles: LifecycleTable) -> OwnershipTracker {
        OwnershipTracker {
            lifecycles,
            admitted: Mutex::new(HashMap::new()),
        }
    }

    /// Whether lifecycles were recorded for this owner and template shape.
    pub fn knows(&self, owner: &OwnerKey, template_hash: u64) -> bool {
        self.lifecycles.intervals_for(owner, template_hash).is_some()
    }

    /// The longest observed closed interval for the key; `None` when
    /// lifecycles were not recorded for that owner, or none ever closed.
    pub fn representative_ttl(&self, owner: &OwnerKey, template_hash: u64) -> Option<Duration> {
        self.lifecycles
            .longest_duration(owner, template_hash)
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
    }

    /// The TTL for the next admitted pod of this shape: the recorded
    /// interval matching its launch position, or the representative TTL when
    /// that interval never closed (or the recording ran out of siblings).
    pub fn next_ttl(&self, owner: &OwnerKey, template_hash: u64) -> Option<Duration> {
        let intervals = self.lifecycles.intervals_for(owner, template_hash)?;

        let seq = {
            let mut admitted = self.admitted.lock().unwrap();
            let counter = admitted.entry((owner.clone(), template_hash)).or_default();
            let seq = *counter;
            *counter += 1;
            seq
        };

        intervals[seq % intervals.len()]
            .duration()
            .map(|secs| Duration::from_secs(secs.max(0) as u64))
            .or_else(|| self.representative_ttl(owner, template_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::KindId;

    fn owner() -> OwnerKey {
        (KindId::new("apps", "v1", "Deployment"), "default/web".into())
    }

    fn tracker_with(intervals: &[(i64, Option<i64>)]) -> OwnershipTracker {
        let mut table = LifecycleTable::new();
        for (start, end) in intervals {
            table.record_start(owner(), 7, *start);
            if let Some(end) = end {
                table.record_end(owner(), 7, *end);
            }
        }
        OwnershipTracker::new(table)
    }

    #[test]
    fn test_representative_ttl_is_longest_closed_interval() {
        let tracker = tracker_with(&[(0, Some(30)), (100, Some(250)), (300, None)]);
        assert_eq!(tracker.representative_ttl(&owner(), 7), Some(Duration::from_secs(150)));
    }

    #[test]
    fn test_unknown_owner_has_no_ttl() {
        let tracker = tracker_with(&[(0, Some(30))]);
        let other = (KindId::new("apps", "v1", "StatefulSet"), "default/db".to_string());

        assert_eq!(tracker.representative_ttl(&other, 7), None);
        assert_eq!(tracker.next_ttl(&owner(), 8), None);
        assert!(!tracker.knows(&other, 7));
    }

    #[test]
    fn test_siblings_step_through_recorded_intervals() {
        let tracker = tracker_with(&[(0, Some(30)), (100, Some(250))]);

        assert_eq!(tracker.next_ttl(&owner(), 7), Some(Duration::from_secs(30)));
        assert_eq!(tracker.next_ttl(&owner(), 7), Some(Duration::from_secs(150)));
        // past the recording, wrap around in launch order
        assert_eq!(tracker.next_ttl(&owner(), 7), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_open_interval_falls_back_to_representative() {
        let tracker = tracker_with(&[(0, None), (100, Some(250))]);
        assert_eq!(tracker.next_ttl(&owner(), 7), Some(Duration::from_secs(150)));
    }
}
