//! Binary trace codec
//!
//! A trace is a single MessagePack document with exactly five named
//! top-level fields, in order: `version`, `config`, `events`, `index`,
//! `pod_lifecycles`. MessagePack was chosen because the lifecycle table is
//! keyed by `(kind, namespace/name)` tuples, which must survive a round trip
//! as first-class map keys; a JSON pivot cannot represent them.
//!
//! The decoder refuses any version other than [`TRACE_VERSION`]; it never
//! silently accepts or auto-upgrades. Bumping the version is required for
//! any change to the canonicalization or hashing rules, not just the layout.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::TrackerConfig;
use crate::errors::CodecError;
use crate::models::TimelineEvent;
use crate::store::{IntervalsByTemplate, KindIndex, OwnerKey};

pub const TRACE_VERSION: u16 = 2;

/// The decoded form of a trace artifact.
#[derive(Debug, Deserialize, Serialize)]
pub struct TraceDocument {
    pub version: u16,
    pub config: TrackerConfig,
    pub events: Vec<TimelineEvent>,
    pub index: KindIndex,
    pub pod_lifecycles: HashMap<OwnerKey, IntervalsByTemplate>,
}

pub fn encode(doc: &TraceDocument) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(doc)?)
}

pub fn decode(data: &[u8]) -> Result<TraceDocument, CodecError> {
    let doc: TraceDocument = rmp_serde::from_slice(data)?;
    if doc.version != TRACE_VERSION {
        return Err(CodecError::UnsupportedVersion(doc.version));
    }
    Ok(doc)
}
