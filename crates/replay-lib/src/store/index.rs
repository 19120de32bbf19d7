//! Kind index: the set of currently-live objects and their content hashes
//!
//! Invariant: after applying any prefix of the timeline, the index holds
//! exactly the keys that have been applied and not yet deleted, each mapped
//! to the hash of its last applied form.

use std::collections::HashMap;
use std::mem::take;

use serde::{Deserialize, Serialize};

use crate::k8s::KindId;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(transparent)]
pub struct KindIndex {
    by_kind: HashMap<KindId, HashMap<String, u64>>,
}

impl KindIndex {
    pub fn new() -> KindIndex {
        KindIndex::default()
    }

    pub fn contains(&self, kind: &KindId, ns_name: &str) -> bool {
        self.by_kind.get(kind).is_some_and(|m| m.contains_key(ns_name))
    }

    pub fn get(&self, kind: &KindId, ns_name: &str) -> Option<u64> {
        self.by_kind.get(kind)?.get(ns_name).copied()
    }

    pub fn insert(&mut self, kind: KindId, ns_name: String, hash: u64) {
        self.by_kind.entry(kind).or_default().insert(ns_name, hash);
    }

    pub fn remove(&mut self, kind: &KindId, ns_name: &str) {
        if let Some(m) = self.by_kind.get_mut(kind) {
            m.remove(ns_name);
        }
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(HashMap::is_empty)
    }

    /// Swap out one kind's entries, leaving that kind empty. Used by relist
    /// reconciliation to diff the fresh listing against what was live.
    pub fn take_kind(&mut self, kind: &KindId) -> HashMap<String, u64> {
        self.by_kind.get_mut(kind).map(take).unwrap_or_default()
    }

    pub fn keys(&self) -> impl Iterator<Item = (&KindId, &String)> {
        self.by_kind.iter().flat_map(|(kind, m)| m.keys().map(move |k| (kind, k)))
    }
}
