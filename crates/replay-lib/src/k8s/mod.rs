//! Kubernetes helpers shared by the recorder and the driver
//!
//! Everything here works with dynamic (unstructured) objects, since the set
//! of tracked kinds is only known at runtime.

mod api_cache;
mod container_state;
mod kind_id;
mod root;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};

pub use self::api_cache::ApiCache;
pub use self::container_state::{
    earliest_container_start, latest_container_end, phase_is_terminal, pod_has_ended,
};
pub use self::kind_id::{KindId, OwnerReference};
pub use self::root::{SimulationRoot, SimulationRootSpec};

/// Label applied to every object the driver creates; value is the simulation
/// identity.
pub const SIMULATION_LABEL_KEY: &str = "simulation";

/// Marks namespaces and workload objects that exist only inside a simulation.
pub const SIMULATED_LABEL_KEY: &str = "replay.io/simulated";

/// Carried on replayed pod templates so the admission mutator can find the
/// recorded owner even though the pod runs in a prefixed virtual namespace.
pub const SOURCE_NAMESPACE_ANNOTATION_KEY: &str = "replay.io/source-namespace";

/// Annotation the mutator writes for the virtual-node agent to honor.
pub const LIFETIME_ANNOTATION_KEY: &str = "lifetime-seconds";

/// Node selector inserted on simulated pods.
pub const NODE_ROLE_SELECTOR_KEY: &str = "node-role";
pub const NODE_ROLE_SELECTOR_VALUE: &str = "virtual";

/// Taint key virtual nodes carry; simulated pods tolerate it.
pub const VIRTUAL_NODE_TAINT_KEY: &str = "virtual-node-taint";

pub trait ResourceIdentityExt {
    /// The `namespace/name` key used throughout the trace; cluster-scoped
    /// objects use the bare name.
    fn namespaced_name(&self) -> String;
}

impl<T: Resource> ResourceIdentityExt for T {
    fn namespaced_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }
}

pub fn split_namespaced_name(ns_name: &str) -> (String, String) {
    match ns_name.split_once('/') {
        Some((ns, name)) => (ns.into(), name.into()),
        None => (String::new(), ns_name.into()),
    }
}

/// Build the skeleton object needed to issue a delete for a key that is no
/// longer in any cache.
pub fn deletion_stub(kind: &KindId, ns_name: &str) -> DynamicObject {
    let (ns, name) = split_namespaced_name(ns_name);
    DynamicObject {
        types: Some(kind.type_meta()),
        metadata: metav1::ObjectMeta {
            namespace: if ns.is_empty() { None } else { Some(ns) },
            name: Some(name),
            ..Default::default()
        },
        data: serde_json::Value::Null,
    }
}

/// Stamp the simulation labels and the owning root reference onto metadata.
///
/// Both `controller` and `block_owner_deletion` are set so that foreground
/// deletion of the root waits for the owned object.
pub fn stamp_simulation_metadata<K>(sim_name: &str, root: &K, meta: &mut metav1::ObjectMeta)
where
    K: Resource<DynamicType = ()>,
{
    let labels = meta.labels.get_or_insert(BTreeMap::new());
    labels.insert(SIMULATION_LABEL_KEY.into(), sim_name.into());
    labels.insert(SIMULATED_LABEL_KEY.into(), "true".into());

    meta.owner_references.get_or_insert(vec![]).push(metav1::OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: root.name_any(),
        uid: root.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    });
}

/// Evaluate a label selector against an object's labels.
///
/// Only the operators Kubernetes defines are accepted; anything else is a
/// malformed selector and an error.
pub fn selector_matches(
    labels: &BTreeMap<String, String>,
    sel: &metav1::LabelSelector,
) -> anyhow::Result<bool> {
    if let Some(match_labels) = &sel.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return Ok(false);
            }
        }
    }

    if let Some(exprs) = &sel.match_expressions {
        for expr in exprs {
            if !expression_matches(labels, expr)? {
                return Ok(false);
            }
        }
    }

    Ok(true)
}

fn expression_matches(
    labels: &BTreeMap<String, String>,
    expr: &metav1::LabelSelectorRequirement,
) -> anyhow::Result<bool> {
    let values = expr.values.as_deref().unwrap_or(&[]);
    match expr.operator.as_str() {
        "In" => {
            anyhow::ensure!(!values.is_empty(), "selector operator In requires values");
            Ok(labels.get(&expr.key).is_some_and(|v| values.contains(v)))
        },
        "NotIn" => {
            anyhow::ensure!(!values.is_empty(), "selector operator NotIn requires values");
            Ok(labels.get(&expr.key).map_or(true, |v| !values.contains(v)))
        },
        "Exists" => {
            anyhow::ensure!(values.is_empty(), "selector operator Exists takes no values");
            Ok(labels.contains_key(&expr.key))
        },
        "DoesNotExist" => {
            anyhow::ensure!(values.is_empty(), "selector operator DoesNotExist takes no values");
            Ok(!labels.contains_key(&expr.key))
        },
        op => anyhow::bail!("unknown selector operator: {op}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn expr(key: &str, op: &str, values: Option<Vec<&str>>) -> metav1::LabelSelectorRequirement {
        metav1::LabelSelectorRequirement {
            key: key.into(),
            operator: op.into(),
            values: values.map(|vs| vs.into_iter().map(String::from).collect()),
        }
    }

    #[test]
    fn test_split_namespaced_name() {
        assert_eq!(split_namespaced_name("default/web"), ("default".into(), "web".into()));
        assert_eq!(split_namespaced_name("cluster-thing"), ("".into(), "cluster-thing".into()));
    }

    #[test]
    fn test_match_labels() {
        let sel = metav1::LabelSelector {
            match_labels: Some(labels(&[("app", "web")])),
            ..Default::default()
        };
        assert!(selector_matches(&labels(&[("app", "web"), ("tier", "fe")]), &sel).unwrap());
        assert!(!selector_matches(&labels(&[("app", "db")]), &sel).unwrap());
    }

    #[test]
    fn test_match_expressions() {
        let sel = metav1::LabelSelector {
            match_expressions: Some(vec![expr("tier", "In", Some(vec!["fe", "be"]))]),
            ..Default::default()
        };
        assert!(selector_matches(&labels(&[("tier", "fe")]), &sel).unwrap());
        assert!(!selector_matches(&labels(&[("tier", "cache")]), &sel).unwrap());
        assert!(!selector_matches(&labels(&[]), &sel).unwrap());
    }

    #[test]
    fn test_exists_and_absence() {
        let exists = metav1::LabelSelector {
            match_expressions: Some(vec![expr("canary", "Exists", None)]),
            ..Default::default()
        };
        assert!(selector_matches(&labels(&[("canary", "yes")]), &exists).unwrap());

        let absent = metav1::LabelSelector {
            match_expressions: Some(vec![expr("canary", "DoesNotExist", None)]),
            ..Default::default()
        };
        assert!(selector_matches(&labels(&[]), &absent).unwrap());
        assert!(!selector_matches(&labels(&[("canary", "yes")]), &absent).unwrap());
    }

    #[test]
    fn test_malformed_selector_is_an_error() {
        let sel = metav1::LabelSelector {
            match_expressions: Some(vec![expr("k", "In", None)]),
            ..Default::default()
        };
        assert!(selector_matches(&labels(&[]), &sel).is_err());
    }
}
