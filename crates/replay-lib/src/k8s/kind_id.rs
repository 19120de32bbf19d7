//! Runtime identity of a tracked resource kind
//!
//! Tracked kinds are only known from configuration, so everything in this
//! crate addresses them by `(group, version, kind)` rather than by a static
//! type. The serialized form is the `group/version.Kind` string used in the
//! config file and the trace document (`version.Kind` for the core group).

use std::fmt;

use kube::api::{DynamicObject, GroupVersionKind, TypeMeta};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::ConfigError;

pub type OwnerReference = k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

/// A `(group, version, kind)` triple usable as a map key.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct KindId {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl KindId {
    pub fn new(group: &str, version: &str, kind: &str) -> KindId {
        KindId {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Read the identity off a dynamic object's type metadata.
    pub fn of(obj: &DynamicObject) -> anyhow::Result<KindId> {
        match &obj.types {
            Some(t) => Ok(KindId::from_type_meta(t)),
            None => anyhow::bail!("object {:?} carries no type metadata", obj.metadata.name),
        }
    }

    pub fn from_type_meta(tm: &TypeMeta) -> KindId {
        let (group, version) = match tm.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", tm.api_version.as_str()),
        };
        KindId::new(group, version, &tm.kind)
    }

    /// Parse the identity out of an owner reference's `apiVersion` + `kind`.
    pub fn from_owner_ref(rf: &OwnerReference) -> anyhow::Result<KindId> {
        let (group, version) = match rf.api_version.split_once('/') {
            Some((g, v)) if !v.contains('/') => (g, v),
            None => ("", rf.api_version.as_str()),
            _ => anyhow::bail!("invalid apiVersion in owner reference: {}", rf.api_version),
        };
        Ok(KindId::new(group, version, &rf.kind))
    }

    /// Parse the `group/version.Kind` config-file form.
    pub fn parse(s: &str) -> Result<KindId, ConfigError> {
        let (group, rest) = match s.split_once('/') {
            Some((g, r)) => (g, r),
            None => ("", s),
        };
        match rest.split_once('.') {
            Some((version, kind))
                if !version.is_empty()
                    && !kind.is_empty()
                    && !version.contains('/')
                    && !kind.contains('.') =>
            {
                Ok(KindId::new(group, version, kind))
            },
            _ => Err(ConfigError::MalformedKind(s.into())),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version(),
            kind: self.kind.clone(),
        }
    }

    pub fn to_gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}.{}", self.group, self.version, self.kind)
        }
    }
}

impl Serialize for KindId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KindId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<KindId, D::Error> {
        let s = String::deserialize(deserializer)?;
        KindId::parse(&s).map_err(|e| de::Error::custom(e.to_string()))
    }
}
