//! Core data models shared by the recorder and the driver

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};

/// What happened to an object at a point on the timeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraceAction {
    Applied,
    Deleted,
}

/// One step of the recorded timeline: everything applied and deleted at a
/// single timestamp (seconds).
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub ts: i64,
    pub applied_objs: Vec<DynamicObject>,
    pub deleted_objs: Vec<DynamicObject>,
}

impl TimelineEvent {
    pub fn at(ts: i64) -> TimelineEvent {
        TimelineEvent { ts, ..Default::default() }
    }

    pub fn len(&self) -> usize {
        self.applied_objs.len() + self.deleted_objs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied_objs.is_empty() && self.deleted_objs.is_empty()
    }
}

/// One observed pod lifetime. `end_ts` stays open until the pod reaches a
/// terminal state or disappears.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PodInterval {
    pub start_ts: i64,
    pub end_ts: Option<i64>,
}

impl PodInterval {
    pub fn open(start_ts: i64) -> PodInterval {
        PodInterval { start_ts, end_ts: None }
    }

    pub fn closed(start_ts: i64, end_ts: i64) -> PodInterval {
        PodInterval { start_ts, end_ts: Some(end_ts) }
    }

    pub fn is_open(&self) -> bool {
        self.end_ts.is_none()
    }

    /// Observed duration in seconds; `None` while the interval is open.
    pub fn duration(&self) -> Option<i64> {
        self.end_ts.map(|end| end - self.start_ts)
    }

    /// Whether any part of the interval falls inside `[start_ts, end_ts)`.
    /// Open intervals count as running forever.
    pub fn overlaps(&self, start_ts: i64, end_ts: i64) -> bool {
        match self.end_ts {
            None => self.start_ts < end_ts,
            Some(end) => self.start_ts < end_ts && end >= start_ts,
        }
    }

    /// Clamp the interval to a window, preserving openness.
    pub fn clamped(&self, start_ts: i64, end_ts: i64) -> PodInterval {
        PodInterval {
            start_ts: self.start_ts.max(start_ts),
            end_ts: self.end_ts.map(|end| end.min(end_ts)),
        }
    }
}

/// Filters applied to an export: matching objects are removed from the
/// exported window.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExportFilters {
    #[serde(default)]
    pub excluded_namespaces: Vec<String>,

    #[serde(default)]
    pub excluded_labels: Vec<metav1::LabelSelector>,

    #[serde(default)]
    pub exclude_daemonsets: bool,
}

/// Body of `POST /export`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ExportRequest {
    pub start_ts: i64,
    pub end_ts: i64,

    #[serde(default)]
    pub filters: ExportFilters,

    /// Optional destination URI; cloud schemes are written server-side.
    #[serde(default)]
    pub export_path: Option<String>,
}
