//! Deterministic canonicalization of query contexts.
//!
//! Cache keys must be stable across processes and insertion orders, so the
//! canonical form is defined as: JSON with object keys sorted
//! lexicographically at every nesting level, arrays kept in order, and
//! volatile fields (request ids, timestamps) removed entirely before
//! serialization.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Field names that never participate in cache keys or plan ids.
const VOLATILE_KEYS: [&str; 5] = ["timestamp", "request_id", "trace_id", "now", "generated_at"];

/// Rebuild a JSON value with sorted object keys and volatile fields dropped.
pub fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            // serde_json::Map iterates in sorted key order (BTreeMap-backed),
            // but sortedness is part of this function's contract, so rebuild
            // explicitly rather than relying on the feature set.
            let mut sorted: Vec<(&String, &serde_json::Value)> = map
                .iter()
                .filter(|(k, _)| !VOLATILE_KEYS.contains(&k.as_str()))
                .collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            serde_json::Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Stable hex digest of a canonicalized JSON value.
pub fn digest(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value).to_string();
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
