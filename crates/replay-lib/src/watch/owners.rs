//! Ownership chain resolution
//!
//! Pods are tracked by owner, not by name, so every pod event needs the
//! chain of controller back-references walked up to a tracked kind. The walk
//! is depth-bounded with cycle detection (malformed controllers have been
//! observed to produce reference cycles); a cycle discards the event.
//!
//! Lookups race the informer caches on the apiserver side, so an owner that
//! is not yet visible is retried with bounded exponential backoff before the
//! event is dropped.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use kube::api::ListParams;
use kube::discovery::Scope;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::k8s::{ApiCache, KindId, OwnerReference, ResourceIdentityExt};

/// How far up a controller chain we are willing to walk.
const MAX_OWNER_DEPTH: usize = 8;

/// Lookup attempts before an unresolved owner drops the event.
const LOOKUP_ATTEMPTS: u32 = 4;
const LOOKUP_BASE_DELAY: Duration = Duration::from_millis(250);
const LOOKUP_MAX_DELAY: Duration = Duration::from_secs(5);

/// One ancestor on an ownership chain.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct OwnerLink {
    pub kind: KindId,
    pub namespace: String,
    pub name: String,
}

impl OwnerLink {
    pub fn from_ref(rf: &OwnerReference, namespace: &str) -> anyhow::Result<OwnerLink> {
        Ok(OwnerLink {
            kind: KindId::from_owner_ref(rf)?,
            namespace: namespace.into(),
            name: rf.name.clone(),
        })
    }

    pub fn ns_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

/// Source of owner references for an arbitrary object. Separated out so the
/// walk itself is testable without an apiserver.
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    /// `Ok(None)` means the object is not (yet) visible.
    async fn owner_refs(
        &self,
        kind: &KindId,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<Vec<OwnerReference>>>;
}

/// Lookup against the live apiserver, by field selector on name (and
/// namespace, for namespaced kinds).
pub struct ApiOwnerLookup {
    apis: Mutex<ApiCache>,
}

impl ApiOwnerLookup {
    pub fn new(client: kube::Client) -> ApiOwnerLookup {
        ApiOwnerLookup { apis: Mutex::new(ApiCache::new(client)) }
    }
}

#[async_trait]
impl OwnerLookup for ApiOwnerLookup {
    async fn owner_refs(
        &self,
        kind: &KindId,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<Vec<OwnerReference>>> {
        let mut apis = self.apis.lock().await;
        let (api, caps) = apis.cluster_api(kind).await?;

        let field_selector = match caps.scope {
            Scope::Cluster => format!("metadata.name={name}"),
            Scope::Namespaced => format!("metadata.namespace={namespace},metadata.name={name}"),
        };
        let resp = api.list(&ListParams { field_selector: Some(field_selector), ..Default::default() }).await?;

        match resp.items.len() {
            0 => Ok(None),
            1 => Ok(Some(resp.items[0].metadata.owner_references.clone().unwrap_or_default())),
            n => anyhow::bail!("expected one owner named {namespace}/{name}, found {n}"),
        }
    }
}

/// Resolves and caches ownership chains.
pub struct OwnershipResolver<L> {
    lookup: L,
    chains: Mutex<HashMap<OwnerLink, Vec<OwnerLink>>>,
}

impl<L: OwnerLookup> OwnershipResolver<L> {
    pub fn new(lookup: L) -> OwnershipResolver<L> {
        OwnershipResolver { lookup, chains: Mutex::new(HashMap::new()) }
    }

    /// Every ancestor of an object, nearest first, given the object's own
    /// owner references.
    pub async fn resolve_chain(
        &self,
        namespace: &str,
        refs: &[OwnerReference],
    ) -> anyhow::Result<Vec<OwnerLink>> {
        let mut chain = vec![];
        for rf in controller_refs(refs) {
            let link = OwnerLink::from_ref(rf, namespace)?;
            chain.extend(self.chain_from(link).await?);
        }
        Ok(chain)
    }

    async fn chain_from(&self, start: OwnerLink) -> anyhow::Result<Vec<OwnerLink>> {
        if let Some(cached) = self.chains.lock().await.get(&start) {
            debug!(owner = %cached_key(&start), "ownership chain cache hit");
            return Ok(cached.clone());
        }

        let mut chain: Vec<OwnerLink> = vec![];
        let mut visited: HashSet<OwnerLink> = HashSet::new();
        let mut frontier = vec![start.clone()];

        while let Some(link) = frontier.pop() {
            if !visited.insert(link.clone()) {
                anyhow::bail!("ownership cycle detected at {}", cached_key(&link));
            }
            if chain.len() >= MAX_OWNER_DEPTH {
                anyhow::bail!("ownership chain exceeds depth {MAX_OWNER_DEPTH} at {}", cached_key(&link));
            }

            let parent_refs = self.lookup_with_retry(&link).await?;
            chain.push(link.clone());
            for rf in controller_refs(&parent_refs) {
                frontier.push(OwnerLink::from_ref(rf, &link.namespace)?);
            }
        }

        self.chains.lock().await.insert(start, chain.clone());
        Ok(chain)
    }

    async fn lookup_with_retry(&self, link: &OwnerLink) -> anyhow::Result<Vec<OwnerReference>> {
        let mut backoff = Backoff::new(LOOKUP_BASE_DELAY, LOOKUP_MAX_DELAY);
        for attempt in 1..=LOOKUP_ATTEMPTS {
            match self.lookup.owner_refs(&link.kind, &link.namespace, &link.name).await {
                Ok(Some(refs)) => return Ok(refs),
                Ok(None) => {
                    debug!(owner = %cached_key(link), attempt, "owner not visible yet, backing off");
                },
                Err(err) => {
                    warn!(owner = %cached_key(link), attempt, error = %err, "owner lookup failed, backing off");
                },
            }
            if attempt < LOOKUP_ATTEMPTS {
                sleep(backoff.next_delay()).await;
            }
        }
        anyhow::bail!("owner {} unresolved after {LOOKUP_ATTEMPTS} attempts", cached_key(link))
    }
}

fn controller_refs(refs: &[OwnerReference]) -> impl Iterator<Item = &OwnerReference> {
    refs.iter().filter(|rf| rf.controller.unwrap_or(false))
}

fn cached_key(link: &OwnerLink) -> String {
    format!("{}:{}", link.kind, link.ns_name())
}

/// Convenience for callers that hold a pod: resolve its chain from its
/// metadata.
pub async fn resolve_pod_chain<L: OwnerLookup>(
    resolver: &OwnershipResolver<L>,
    pod: &k8s_openapi::api::core::v1::Pod,
) -> anyhow::Result<Vec<OwnerLink>> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let refs = pod.metadata.owner_references.clone().unwrap_or_default();
    let chain = resolver.resolve_chain(&namespace, &refs).await;
    if let Err(err) = &chain {
        debug!(pod = %pod.namespaced_name(), error = %err, "could not resolve pod ownership");
    }
    chain
}
