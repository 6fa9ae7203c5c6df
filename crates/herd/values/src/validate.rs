//! Post-merge sanity checks

use serde_json::{Map, Value};

/// Walk merged values and collect human-readable warnings.
///
/// Flags an empty result and every key, at any depth and inside arrays, that
/// starts with `reserved_prefix`. Paths use `a.b[0].c` notation.
pub fn validate_values(values: &Map<String, Value>, reserved_prefix: &str) -> Vec<String> {
    let mut warnings = Vec::new();

    if values.is_empty() {
        warnings.push("Values are empty".to_string());
    }

    check_map(values, "", reserved_prefix, &mut warnings);
    warnings
}

fn check_map(map: &Map<String, Value>, path: &str, prefix: &str, warnings: &mut Vec<String>) {
    for (key, value) in map {
        let current = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        if !prefix.is_empty() && key.starts_with(prefix) {
            warnings.push(format!(
                "Key '{current}' starts with reserved prefix '{prefix}'"
            ));
        }
        check_value(value, &current, prefix, warnings);
    }
}

fn check_value(value: &Value, path: &str, prefix: &str, warnings: &mut Vec<String>) {
    match value {
        Value::Object(map) => check_map(map, path, prefix, warnings),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_value(item, &format!("{path}[{i}]"), prefix, warnings);
            }
        }
        _ => {}
    }
}
