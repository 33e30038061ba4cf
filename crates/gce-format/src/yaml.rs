//! Deterministic YAML canonicalization.
//!
//! Same object tree in, same byte sequence out: keys are sorted recursively
//! and a fixed set of volatile metadata fields are stripped before
//! serialization, so repeated canonicalization of logically-unchanged
//! objects produces byte-identical output (required by the no-op
//! suppression in the commit generator).

use serde_yaml::Mapping;
use serde_yaml::Value;

/// Metadata fields considered volatile and stripped from `metadata` before
/// serialization. `status` is dropped wholesale as a top-level key.
const VOLATILE_METADATA_FIELDS: &[&str] = &[
    "resourceVersion",
    "generation",
    "uid",
    "selfLink",
    "managedFields",
    "creationTimestamp",
];

/// Canonicalizes `value` into a stable byte sequence.
///
/// # Errors
/// - `value` cannot be serialized as YAML.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, serde_yaml::Error> {
    let sanitized = strip_volatile(value.clone());
    let sorted = sort_keys(sanitized);
    serde_yaml::to_string(&sorted).map(String::into_bytes)
}

fn strip_volatile(mut value: Value) -> Value {
    if let Value::Mapping(map) = &mut value {
        map.remove("status");
        if let Some(Value::Mapping(metadata)) = map.get_mut("metadata") {
            for field in VOLATILE_METADATA_FIELDS {
                metadata.remove(*field);
            }
        }
    }
    value
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut sorted = map
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect::<Vec<_>>();
            sorted.sort_by(|(a, _), (b, _)| yaml_key_string(a).cmp(&yaml_key_string(b)));
            let mut out = Mapping::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn yaml_key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other).unwrap_or_default(),
    }
}
