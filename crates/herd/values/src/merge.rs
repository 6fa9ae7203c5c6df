//! Recursive map merge

use serde_json::{Map, Value};

/// Merge `overlay` into `base` in place.
///
/// Keys recurse only when both sides hold a map. Any other pairing,
/// including map-vs-scalar and any array, replaces the base value with the
/// overlay value. Arrays are never concatenated.
pub fn deep_merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Owned variant of [`deep_merge`]
pub fn merged(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    deep_merge(&mut base, overlay);
    base
}
