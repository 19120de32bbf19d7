//! Pod container state inspection
//!
//! Lifecycle timestamps come from container statuses, not from pod-level
//! metadata: the creation timestamp includes scheduling and image-pull time,
//! and the pod phase has no "first container started" transition. So the
//! start of a pod's life is the earliest start among its containers (init
//! containers included), and its end is the latest finish, counted only
//! once every main container has terminated.

use k8s_openapi::api::core::v1 as corev1;

/// Terminal pod phases; a pod in one of these is done regardless of what
/// its container statuses still say.
pub fn phase_is_terminal(pod: &corev1::Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Earliest observed container start across init and main containers;
/// `None` while everything is still waiting.
pub fn earliest_container_start(pod: &corev1::Pod) -> Option<i64> {
    all_statuses(pod)
        .filter_map(|cs| {
            let state = cs.state.as_ref()?;
            if let Some(running) = &state.running {
                running.started_at.as_ref().map(|t| t.0.timestamp())
            } else if let Some(terminated) = &state.terminated {
                terminated.started_at.as_ref().map(|t| t.0.timestamp())
            } else {
                None
            }
        })
        .min()
}

/// Latest container finish time, provided every main container has
/// terminated. A pod with one container still running has not ended, no
/// matter how many siblings already have.
pub fn latest_container_end(pod: &corev1::Pod) -> Option<i64> {
    let spec_containers = pod.spec.as_ref().map(|s| s.containers.len()).unwrap_or(0);
    let terminated: Vec<_> = main_statuses(pod)
        .filter_map(|cs| cs.state.as_ref()?.terminated.as_ref())
        .collect();

    if spec_containers == 0 || terminated.len() != spec_containers {
        return None;
    }

    terminated
        .iter()
        .filter_map(|t| t.finished_at.as_ref().map(|ts| ts.0.timestamp()))
        .max()
}

/// Whether the pod's life is over: terminal phase, or every main container
/// terminated.
pub fn pod_has_ended(pod: &corev1::Pod) -> bool {
    phase_is_terminal(pod) || latest_container_end(pod).is_some()
}

fn main_statuses(pod: &corev1::Pod) -> impl Iterator<Item = &corev1::ContainerStatus> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_deref())
        .unwrap_or_default()
        .iter()
}

fn all_statuses(pod: &corev1::Pod) -> impl Iterator<Item = &corev1::ContainerStatus> {
    pod.status
        .as_ref()
        .and_then(|s| s.init_container_statuses.as_deref())
        .unwrap_or_default()
        .iter()
        .chain(main_statuses(pod))
}
