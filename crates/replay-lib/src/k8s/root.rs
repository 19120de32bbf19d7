//! The simulation root object
//!
//! Every object the driver creates is owned (directly or transitively) by a
//! single cluster-scoped root. Deleting the root with foreground propagation
//! tears down the entire simulation through the garbage collector, which is
//! the only cleanup path that survives a driver crash.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, Serialize)]
#[kube(group = "replay.io", version = "v1", kind = "SimulationRoot")]
pub struct SimulationRootSpec {}
