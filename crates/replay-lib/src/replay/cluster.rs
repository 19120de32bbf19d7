//! Live-cluster applier
//!
//! Server-side apply with a fixed field manager, so repeated replays of the
//! same trace upsert cleanly instead of conflicting with themselves.

use std::collections::BTreeMap;

use async_trait::async_trait;
use either::Either;
use k8s_openapi::api::core::v1 as corev1;
use kube::api::{DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy};
use kube::ResourceExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::ClusterApplier;
use crate::errors::ApplyError;
use crate::k8s::{
    stamp_simulation_metadata, ApiCache, KindId, SimulationRoot, SimulationRootSpec,
    SIMULATED_LABEL_KEY, SIMULATION_LABEL_KEY,
};

const FIELD_MANAGER: &str = "cluster-replay";

pub struct KubeApplier {
    client: kube::Client,
    apis: Mutex<ApiCache>,
}

impl KubeApplier {
    pub fn new(client: kube::Client) -> KubeApplier {
        KubeApplier {
            apis: Mutex::new(ApiCache::new(client.clone())),
            client,
        }
    }

    fn roots_api(&self) -> kube::Api<SimulationRoot> {
        kube::Api::all(self.client.clone())
    }

    fn is_not_found(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(resp) if resp.code == 404)
    }
}

#[async_trait]
impl ClusterApplier for KubeApplier {
    async fn ensure_root(&self, name: &str, sim_name: &str) -> anyhow::Result<SimulationRoot> {
        let roots = self.roots_api();
        if let Some(existing) = roots.get_opt(name).await? {
            warn!(root = name, "simulation root already exists, reusing");
            return Ok(existing);
        }

        let mut root = SimulationRoot::new(name, SimulationRootSpec {});
        let labels: BTreeMap<String, String> = [
            (SIMULATION_LABEL_KEY.to_string(), sim_name.to_string()),
            (SIMULATED_LABEL_KEY.to_string(), "true".to_string()),
        ]
        .into();
        root.metadata.labels = Some(labels);

        Ok(roots.create(&Default::default(), &root).await?)
    }

    async fn ensure_namespace(&self, namespace: &str, root: &SimulationRoot) -> Result<(), ApplyError> {
        let ns_api: kube::Api<corev1::Namespace> = kube::Api::all(self.client.clone());

        match ns_api.get_opt(namespace).await {
            Ok(Some(_)) => return Ok(()),
            Ok(None) => {},
            Err(err) => return Err(ApplyError::from_kube(err)),
        }

        let mut ns = corev1::Namespace::default();
        ns.metadata.name = Some(namespace.into());
        stamp_simulation_metadata(&root.name_any(), root, &mut ns.metadata);

        match ns_api.create(&Default::default(), &ns).await {
            Ok(_) => Ok(()),
            // a concurrent create beat us; that is fine
            Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
            Err(err) => Err(ApplyError::from_kube(err)),
        }
    }

    async fn apply(&self, obj: &DynamicObject) -> Result<(), ApplyError> {
        let kind = KindId::of(obj).map_err(|err| ApplyError::Permanent(err.to_string()))?;

        let mut apis = self.apis.lock().await;
        let api = apis
            .api_for(&kind, obj.namespace().as_deref())
            .await
            .map_err(|err| ApplyError::Transient(err.to_string()))?;

        api.patch(&obj.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(obj))
            .await
            .map(|_| ())
            .map_err(ApplyError::from_kube)
    }

    async fn delete(&self, kind: &KindId, namespace: &str, name: &str) -> Result<(), ApplyError> {
        let mut apis = self.apis.lock().await;
        let api = apis
            .api_for(kind, Some(namespace))
            .await
            .map_err(|err| ApplyError::Transient(err.to_string()))?;

        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(err) if Self::is_not_found(&err) => Ok(()),
            Err(err) => Err(ApplyError::from_kube(err)),
        }
    }

    async fn delete_root(&self, name: &str) -> anyhow::Result<bool> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Foreground),
            ..Default::default()
        };

        match self.roots_api().delete(name, &params).await {
            // left: deletion in progress, right: fully deleted
            Ok(Either::Left(_)) => Ok(false),
            Ok(Either::Right(_)) => Ok(true),
            Err(err) if Self::is_not_found(&err) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }
}
