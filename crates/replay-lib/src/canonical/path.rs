//! Template path mini-DSL
//!
//! Configured pod-template locations are JSON-pointer-like paths where a `*`
//! segment means "every element of this array", e.g. `/spec/template` or
//! `/spec/tasks/*/template`. Using `*` against anything that is not an array
//! is a type error.

use serde_json::Value;

use crate::errors::ConfigError;

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Key(String),
    Wildcard,
}

/// A parsed template path, resolvable against a dynamic object tree.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplatePath {
    raw: String,
    segments: Vec<Segment>,
}

impl TemplatePath {
    pub fn parse(raw: &str) -> Result<TemplatePath, ConfigError> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err(ConfigError::InvalidTemplatePath {
                path: raw.into(),
                reason: "must start with '/'".into(),
            });
        };
        if rest.is_empty() {
            return Err(ConfigError::InvalidTemplatePath {
                path: raw.into(),
                reason: "must name at least one field".into(),
            });
        }

        let mut segments = vec![];
        for part in rest.split('/') {
            match part {
                "" => {
                    return Err(ConfigError::InvalidTemplatePath {
                        path: raw.into(),
                        reason: "empty path segment".into(),
                    })
                },
                "*" => segments.push(Segment::Wildcard),
                key => segments.push(Segment::Key(key.replace("~1", "/").replace("~0", "~"))),
            }
        }

        Ok(TemplatePath { raw: raw.into(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The path as a JSON pointer with `idx` substituted for each wildcard;
    /// used when the same location must be addressed in a patch.
    pub fn pointer_for_index(&self, idx: usize) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            match seg {
                Segment::Key(k) => out.push_str(&k.replace('~', "~0").replace('/', "~1")),
                Segment::Wildcard => out.push_str(&idx.to_string()),
            }
        }
        out
    }

    /// Every value the path references within `root`.
    ///
    /// A missing key resolves to nothing (the object simply has no template
    /// there); a wildcard over a non-array is an error.
    pub fn resolve_mut<'a>(&self, root: &'a mut Value) -> anyhow::Result<Vec<&'a mut Value>> {
        let mut out = vec![];
        collect_matches(&self.segments, root, &self.raw, &mut out)?;
        Ok(out)
    }
}

fn collect_matches<'a>(
    segments: &[Segment],
    value: &'a mut Value,
    raw: &str,
    out: &mut Vec<&'a mut Value>,
) -> anyhow::Result<()> {
    let Some((first, rest)) = segments.split_first() else {
        out.push(value);
        return Ok(());
    };

    match first {
        Segment::Key(key) => {
            if let Some(next) = value.get_mut(key.as_str()) {
                collect_matches(rest, next, raw, out)?;
            }
        },
        Segment::Wildcard => match value {
            Value::Array(items) => {
                for item in items {
                    collect_matches(rest, item, raw, out)?;
                }
            },
            Value::Null => {},
            _ => anyhow::bail!("template path {raw}: '*' applied to a non-array value"),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_rejects_relative_and_empty() {
        assert!(TemplatePath::parse("spec/template").is_err());
        assert!(TemplatePath::parse("/").is_err());
        assert!(TemplatePath::parse("/spec//template").is_err());
    }

    #[test]
    fn test_resolve_plain_path() {
        let path = TemplatePath::parse("/spec/template").unwrap();
        let mut doc = json!({"spec": {"template": {"spec": {"containers": []}}}});

        let matches = path.resolve_mut(&mut doc).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(*matches[0], json!({"spec": {"containers": []}}));
    }

    #[test]
    fn test_resolve_missing_key_is_empty() {
        let path = TemplatePath::parse("/spec/template").unwrap();
        let mut doc = json!({"spec": {"replicas": 3}});
        assert!(path.resolve_mut(&mut doc).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_wildcard_fans_out() {
        let path = TemplatePath::parse("/spec/tasks/*/template").unwrap();
        let mut doc = json!({"spec": {"tasks": [
            {"template": {"name": "a"}},
            {"template": {"name": "b"}},
            {"replicas": 2},
        ]}});

        let matches = path.resolve_mut(&mut doc).unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_wildcard_over_non_array_fails() {
        let path = TemplatePath::parse("/spec/*/template").unwrap();
        let mut doc = json!({"spec": {"template": {}}});
        assert!(path.resolve_mut(&mut doc).is_err());
    }

    #[test]
    fn test_pointer_for_index() {
        let path = TemplatePath::parse("/spec/tasks/*/template").unwrap();
        assert_eq!(path.pointer_for_index(2), "/spec/tasks/2/template");
    }
}
