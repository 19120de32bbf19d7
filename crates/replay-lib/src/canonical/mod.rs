//! Object canonicalization
//!
//! This module turns whatever the apiserver hands us into the *canonical
//! form* stored in traces: runtime-assigned fields are stripped, embedded pod
//! templates are normalized, and the result hashes identically no matter
//! which process produced it. Two objects with the same canonical form are
//! treated as the same workload shape everywhere downstream.
//!
//! The transformation runs in a fixed phase order (metadata, then status,
//! then each configured template path) so that the output is bit-identical
//! regardless of how the input was assembled. Canonicalization is idempotent:
//! re-running it on its own output is a no-op.

mod hash;
mod path;

use kube::api::DynamicObject;
use serde_json::Value;

pub use self::hash::{hash, hash_option};
pub use self::path::TemplatePath;

/// Volume (and volume-mount) names the control plane synthesizes for
/// service-account tokens.
const SVC_ACCOUNT_VOLUME_PREFIX: &str = "kube-api-access-";

/// Annotations that only describe how an object was last written.
const APPLY_TRACKING_ANNOTATIONS: &[&str] = &[
    "kubectl.kubernetes.io/last-applied-configuration",
    "deployment.kubernetes.io/revision",
];

/// Strip a tracked object down to its canonical form, in place.
///
/// `template_paths` are the kind's configured pod-template locations; each
/// resolved template is normalized with [`canonical_pod_template`].
pub fn canonicalize_object(
    obj: &mut DynamicObject,
    template_paths: &[TemplatePath],
) -> anyhow::Result<()> {
    strip_assigned_metadata(obj);
    if let Some(map) = obj.data.as_object_mut() {
        map.remove("status");
    }

    for path in template_paths {
        for template in path.resolve_mut(&mut obj.data)? {
            canonical_pod_template(template);
        }
    }

    Ok(())
}

/// The content hash of a canonicalized object.
///
/// Identity metadata (name, namespace) is deliberately excluded so that two
/// identically-shaped workloads hash equal; the hash is a bucket key, never
/// an equality proof.
pub fn shape_hash(obj: &DynamicObject) -> u64 {
    hash(&obj.data)
}

/// Normalize one embedded pod template (a `{metadata, spec}` subtree).
pub fn canonical_pod_template(template: &mut Value) {
    if let Some(map) = template.as_object_mut() {
        map.remove("status");
        if let Some(spec) = map.get_mut("spec") {
            normalize_pod_spec(spec);
        }
    }
    prune_empty_collections(template);
}

/// The canonical form of a bare pod spec, used to compute template hashes for
/// lifecycle bookkeeping on both the recording and the replay side.
pub fn canonical_pod_spec(spec: &Value) -> Value {
    let mut spec = spec.clone();
    normalize_pod_spec(&mut spec);
    prune_empty_collections(&mut spec);
    spec
}

/// The template hash of a pod, from its raw spec subtree.
pub fn pod_template_hash(spec: &Value) -> u64 {
    hash(&canonical_pod_spec(spec))
}

fn strip_assigned_metadata(obj: &mut DynamicObject) {
    let meta = &mut obj.metadata;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.resource_version = None;
    meta.uid = None;
    // Ownership is re-established by the control plane during replay
    meta.owner_references = None;

    if let Some(annotations) = meta.annotations.as_mut() {
        for key in APPLY_TRACKING_ANNOTATIONS {
            annotations.remove(*key);
        }
        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
}

fn normalize_pod_spec(spec: &mut Value) {
    let Some(map) = spec.as_object_mut() else {
        return;
    };

    map.remove("nodeName");
    map.remove("serviceAccount");
    map.remove("serviceAccountName");

    if let Some(Value::Array(volumes)) = map.get_mut("volumes") {
        volumes.retain(|v| !name_has_token_prefix(v));
    }

    if let Some(Value::Array(secrets)) = map.get_mut("imagePullSecrets") {
        secrets.retain(|s| s.get("name").and_then(Value::as_str).is_some_and(|n| !n.is_empty()));
        secrets.sort_by(|a, b| {
            let name = |v: &Value| v.get("name").and_then(Value::as_str).unwrap_or("").to_string();
            name(a).cmp(&name(b))
        });
        secrets.dedup();
    }

    for field in ["containers", "initContainers"] {
        if let Some(Value::Array(containers)) = map.get_mut(field) {
            for container in containers {
                if let Some(cmap) = container.as_object_mut() {
                    // Ports are stripped from replayed objects before apply,
                    // so they must not contribute to the shape either
                    cmap.remove("ports");
                    if let Some(Value::Array(mounts)) = cmap.get_mut("volumeMounts") {
                        mounts.retain(|m| !name_has_token_prefix(m));
                    }
                }
            }
        }
    }
}

fn name_has_token_prefix(v: &Value) -> bool {
    v.get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| name.starts_with(SVC_ACCOUNT_VOLUME_PREFIX))
}

/// Remove empty arrays and maps, bottom-up, so that "absent" and "present but
/// empty" collections canonicalize identically.
fn prune_empty_collections(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for v in map.values_mut() {
                prune_empty_collections(v);
            }
            map.retain(|_, v| !is_empty_collection(v));
        },
        Value::Array(items) => {
            for v in items.iter_mut() {
                prune_empty_collections(v);
            }
        },
        _ => {},
    }
}

fn is_empty_collection(v: &Value) -> bool {
    match v {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
