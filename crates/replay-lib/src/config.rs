//! Tracker configuration
//!
//! The recorder is pointed at a YAML file naming the kinds to watch, where
//! their pod templates live, and whether to record pod lifecycles:
//!
//! ```yaml
//! trackedObjects:
//!   apps/v1.Deployment:
//!     podSpecTemplatePaths: ["/spec/template"]
//!     trackLifecycle: true
//! ```
//!
//! The config travels inside every exported trace so the replay side knows
//! exactly what the recording tracked.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canonical::TemplatePath;
use crate::errors::ConfigError;
use crate::k8s::KindId;

/// Per-kind tracking settings.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedKind {
    /// Locations of embedded pod templates; `*` segments fan out over arrays.
    #[serde(default)]
    pub pod_spec_template_paths: Vec<String>,

    /// Record start/end timestamps for pods owned by this kind.
    #[serde(default)]
    pub track_lifecycle: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    pub tracked_objects: HashMap<KindId, TrackedKind>,
}

impl TrackerConfig {
    /// Load and validate a config file. Any malformed kind string or template
    /// path is startup-fatal.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<TrackerConfig> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let config: TrackerConfig =
            serde_yaml::from_str(&contents).map_err(|source| ConfigError::Unparseable {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse every configured template path, surfacing the first bad one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for tracked in self.tracked_objects.values() {
            for raw in &tracked.pod_spec_template_paths {
                TemplatePath::parse(raw)?;
            }
        }
        Ok(())
    }

    /// Parsed template paths for a kind; empty when the kind has none (or is
    /// not tracked at all).
    pub fn template_paths_for(&self, kind: &KindId) -> Vec<TemplatePath> {
        self.tracked_objects
            .get(kind)
            .map(|t| {
                t.pod_spec_template_paths
                    .iter()
                    .filter_map(|raw| TemplatePath::parse(raw).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn tracks_lifecycle(&self, kind: &KindId) -> bool {
        self.tracked_objects.get(kind).is_some_and(|t| t.track_lifecycle)
    }

    pub fn is_tracked(&self, kind: &KindId) -> bool {
        self.tracked_objects.contains_key(kind)
    }
}
