//! Stable structural hashing of dynamic object trees
//!
//! The content hash is the identity of a workload *shape*: equal canonical
//! forms must produce equal hashes on every process and architecture that
//! ever touches a trace. `DefaultHasher::new()` is specified to use fixed
//! keys, map entries hash in sorted key order (serde_json's map is
//! BTreeMap-backed), and each node hashes a variant tag so that e.g. the
//! string "1" and the number 1 cannot collide structurally.
//!
//! Changing anything about this scheme changes every recorded hash and
//! therefore requires a trace version bump.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde_json::Value;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_NUMBER: u8 = 2;
const TAG_STRING: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_OBJECT: u8 = 5;

/// Hash of a value's structural form.
pub fn hash(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    hash_value(value, &mut hasher);
    hasher.finish()
}

/// Hash of an optional value; `None` hashes like JSON null.
pub fn hash_option(value: Option<&Value>) -> u64 {
    hash(value.unwrap_or(&Value::Null))
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => TAG_NULL.hash(state),
        Value::Bool(b) => {
            TAG_BOOL.hash(state);
            b.hash(state);
        },
        Value::Number(n) => {
            TAG_NUMBER.hash(state);
            n.hash(state);
        },
        Value::String(s) => {
            TAG_STRING.hash(state);
            s.hash(state);
        },
        Value::Array(items) => {
            TAG_ARRAY.hash(state);
            items.len().hash(state);
            for item in items {
                hash_value(item, state);
            }
        },
        Value::Object(map) => {
            TAG_OBJECT.hash(state);
            map.len().hash(state);
            for (k, v) in map {
                k.hash(state);
                hash_value(v, state);
            }
        },
    }
}
