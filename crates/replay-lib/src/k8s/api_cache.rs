//! Discovery-backed cache of dynamic API handles
//!
//! Discovery calls are expensive and the same kinds are used over and over,
//! so resolved `ApiResource`s and `Api` handles are cached per kind.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use kube::api::{ApiResource, DynamicObject};
use kube::discovery::{ApiCapabilities, Scope};

use super::KindId;

pub struct ApiCache {
    client: kube::Client,
    resources: HashMap<KindId, (ApiResource, ApiCapabilities)>,
    cluster_apis: HashMap<KindId, kube::Api<DynamicObject>>,
    namespaced_apis: HashMap<(KindId, String), kube::Api<DynamicObject>>,
}

impl ApiCache {
    pub fn new(client: kube::Client) -> ApiCache {
        ApiCache {
            client,
            resources: HashMap::new(),
            cluster_apis: HashMap::new(),
            namespaced_apis: HashMap::new(),
        }
    }

    pub fn client(&self) -> kube::Client {
        self.client.clone()
    }

    /// An all-namespaces (or cluster-scope) handle for the kind; the variant
    /// used by watches and owner lookups.
    pub async fn cluster_api(
        &mut self,
        kind: &KindId,
    ) -> anyhow::Result<(&kube::Api<DynamicObject>, ApiCapabilities)> {
        let (ar, caps) = self.resource_meta(kind).await?.clone();
        match self.cluster_apis.entry(kind.clone()) {
            Entry::Occupied(e) => Ok((e.into_mut(), caps)),
            Entry::Vacant(e) => {
                let api = kube::Api::all_with(self.client.clone(), &ar);
                Ok((e.insert(api), caps))
            },
        }
    }

    /// A handle scoped to one namespace, used for applies and deletes.
    /// Cluster-scoped kinds fall back to the cluster handle.
    pub async fn api_for(
        &mut self,
        kind: &KindId,
        namespace: Option<&str>,
    ) -> anyhow::Result<&kube::Api<DynamicObject>> {
        let (ar, caps) = self.resource_meta(kind).await?.clone();
        match (caps.scope, namespace) {
            (Scope::Namespaced, Some(ns)) => {
                match self.namespaced_apis.entry((kind.clone(), ns.into())) {
                    Entry::Occupied(e) => Ok(e.into_mut()),
                    Entry::Vacant(e) => {
                        let api = kube::Api::namespaced_with(self.client.clone(), &e.key().1, &ar);
                        Ok(e.insert(api))
                    },
                }
            },
            _ => Ok(self.cluster_api(kind).await?.0),
        }
    }

    async fn resource_meta(&mut self, kind: &KindId) -> anyhow::Result<&(ApiResource, ApiCapabilities)> {
        match self.resources.entry(kind.clone()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let meta = kube::discovery::pinned_kind(&self.client, &e.key().to_gvk()).await?;
                Ok(e.insert(meta))
            },
        }
    }
}
