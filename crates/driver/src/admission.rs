//! Admission mutator
//!
//! Receives pod-create admission reviews and rewrites simulated pods so they
//! land on virtual nodes: the simulation label, a `node-role: virtual` node
//! selector, a toleration for the virtual-node taint, and (when the trace
//! recorded lifecycles for the owning object) a `lifetime-seconds`
//! annotation carrying a representative TTL.
//!
//! Pods whose ownership chain does not reach this simulation's root are
//! returned untouched. Mutation failures also return the pod untouched: a
//! buggy mutator must never block pod creation.

use std::sync::Arc;

use axum::{extract::State, Json};
use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::Pointer;
use k8s_openapi::api::core::v1 as corev1;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use replay_lib::k8s::{
    ResourceIdentityExt, LIFETIME_ANNOTATION_KEY, NODE_ROLE_SELECTOR_KEY, NODE_ROLE_SELECTOR_VALUE,
    SIMULATION_LABEL_KEY, SOURCE_NAMESPACE_ANNOTATION_KEY, VIRTUAL_NODE_TAINT_KEY,
};
use replay_lib::watch::{resolve_pod_chain, OwnerLookup, OwnershipResolver};
use replay_lib::{canonical, DriverMetrics, OwnershipTracker, TimelineStore};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Shared state for the admission endpoint.
pub struct DriverState<L> {
    pub sim_name: String,
    pub root_name: String,
    pub store: TimelineStore,
    pub tracker: OwnershipTracker,
    pub resolver: OwnershipResolver<L>,
    pub metrics: DriverMetrics,
}

/// `POST /mutate`
pub async fn mutate<L: OwnerLookup + 'static>(
    State(state): State<Arc<DriverState<L>>>,
    Json(review): Json<AdmissionReview<corev1::Pod>>,
) -> Json<AdmissionReview<corev1::Pod>> {
    let req: AdmissionRequest<corev1::Pod> = match review.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "malformed admission review");
            state.metrics.inc_admission_reviews("malformed");
            return Json(into_pod_review(AdmissionResponse::invalid(err)));
        },
    };

    let mut resp = AdmissionResponse::from(&req);
    if let Some(pod) = &req.object {
        match build_patch(&state, pod).await {
            Ok(Some(patch)) => match resp.clone().with_patch(patch) {
                Ok(patched) => {
                    state.metrics.inc_admission_reviews("mutated");
                    resp = patched;
                },
                Err(err) => {
                    error!(error = %err, "could not serialize admission patch, allowing pod unmutated");
                    state.metrics.inc_admission_reviews("error");
                },
            },
            Ok(None) => {
                info!(pod = %pod.namespaced_name(), "pod is not part of this simulation, no mutation");
                state.metrics.inc_admission_reviews("skipped");
            },
            Err(err) => {
                // never block pod creation on mutator bugs
                error!(error = %err, "mutation failed, allowing pod unmutated");
                state.metrics.inc_admission_reviews("error");
            },
        }
    }

    Json(into_pod_review(resp))
}

/// The patch for a simulated pod, or `None` for pods that are not ours.
pub async fn build_patch<L: OwnerLookup>(
    state: &DriverState<L>,
    pod: &corev1::Pod,
) -> anyhow::Result<Option<Patch>> {
    let chain = resolve_pod_chain(&state.resolver, pod).await?;

    if !chain.iter().any(|link| link.name == state.root_name && link.kind.kind == "SimulationRoot") {
        return Ok(None);
    }

    let mut ops = vec![];
    add_simulation_label(state, pod, &mut ops);
    add_virtual_node_scheduling(pod, &mut ops);
    add_lifetime_annotation(state, pod, &chain, &mut ops);

    Ok(Some(Patch(ops)))
}

fn add_simulation_label<L>(state: &DriverState<L>, pod: &corev1::Pod, ops: &mut Vec<PatchOperation>) {
    let labels = pod.metadata.labels.as_ref();
    if labels.is_none() {
        ops.push(add_op(&["metadata", "labels"], json!({})));
    }

    if labels.and_then(|l| l.get(SIMULATION_LABEL_KEY)) != Some(&state.sim_name) {
        ops.push(add_op(
            &["metadata", "labels", SIMULATION_LABEL_KEY],
            Value::String(state.sim_name.clone()),
        ));
    }
}

fn add_virtual_node_scheduling(pod: &corev1::Pod, ops: &mut Vec<PatchOperation>) {
    let spec = pod.spec.as_ref();

    let node_selector = spec.and_then(|s| s.node_selector.as_ref());
    if node_selector.is_none() {
        ops.push(add_op(&["spec", "nodeSelector"], json!({})));
    }
    if node_selector.and_then(|ns| ns.get(NODE_ROLE_SELECTOR_KEY)).map(String::as_str)
        != Some(NODE_ROLE_SELECTOR_VALUE)
    {
        ops.push(add_op(
            &["spec", "nodeSelector", NODE_ROLE_SELECTOR_KEY],
            Value::String(NODE_ROLE_SELECTOR_VALUE.into()),
        ));
    }

    let tolerations = spec.and_then(|s| s.tolerations.as_deref()).unwrap_or_default();
    if spec.is_some_and(|s| s.tolerations.is_none()) {
        ops.push(add_op(&["spec", "tolerations"], json!([])));
    }
    let already_tolerates = tolerations.iter().any(|t| {
        t.key.as_deref() == Some(VIRTUAL_NODE_TAINT_KEY)
            && t.operator.as_deref() == Some("Exists")
            && t.effect.as_deref() == Some("NoSchedule")
    });
    if !already_tolerates {
        ops.push(add_op(
            &["spec", "tolerations", "-"],
            json!({"key": VIRTUAL_NODE_TAINT_KEY, "operator": "Exists", "effect": "NoSchedule"}),
        ));
    }
}

/// Attach a TTL when the trace recorded lifecycles for the pod's owner.
///
/// The recorded owner is found through the source-namespace annotation the
/// replay engine stamped onto the pod template, since the live pod runs in a
/// prefixed virtual namespace.
fn add_lifetime_annotation<L>(
    state: &DriverState<L>,
    pod: &corev1::Pod,
    chain: &[replay_lib::watch::OwnerLink],
    ops: &mut Vec<PatchOperation>,
) {
    let Some(source_ns) = pod.metadata.annotations.as_ref().and_then(|a| a.get(SOURCE_NAMESPACE_ANNOTATION_KEY))
    else {
        return;
    };

    let spec_value = match serde_json::to_value(&pod.spec) {
        Ok(v) => v,
        Err(_) => return,
    };
    let template_hash = canonical::pod_template_hash(&spec_value);

    for link in chain {
        let recorded_key = (link.kind.clone(), format!("{source_ns}/{}", link.name));
        if !state.store.is_live(&recorded_key.0, &recorded_key.1) {
            continue;
        }

        match state.tracker.next_ttl(&recorded_key, template_hash) {
            Some(ttl) => {
                let current = pod
                    .metadata
                    .annotations
                    .as_ref()
                    .and_then(|a| a.get(LIFETIME_ANNOTATION_KEY));
                let value = ttl.as_secs().to_string();
                if current != Some(&value) {
                    ops.push(add_op(
                        &["metadata", "annotations", LIFETIME_ANNOTATION_KEY],
                        Value::String(value),
                    ));
                }
            },
            None => warn!(
                owner = %format!("{}:{}", recorded_key.0, recorded_key.1),
                template_hash,
                "no recorded lifecycle for owner, skipping lifetime annotation"
            ),
        }
        break;
    }
}

fn add_op(tokens: &[&str], value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: Pointer::new(tokens),
        value,
    })
}

// AdmissionResponse::into_review goes through the dynamic API; the webhook
// is registered for pods specifically, so rebuild the typed envelope.
fn into_pod_review(resp: AdmissionResponse) -> AdmissionReview<corev1::Pod> {
    AdmissionReview {
        types: resp.types.clone(),
        request: None,
        response: Some(resp),
    }
}
