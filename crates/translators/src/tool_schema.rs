//! JSON-schema allowlist filter
//!
//! Client tool/function schemas often carry vendor-specific or JSON-Schema-draft
//! keys upstream's `functionDeclarations.parameters` validator rejects
//! (`$schema`, `additionalProperties`, `const`, ...). Recursively strip
//! every object down to the allowed key set before forwarding.

use serde_json::Value;

const ALLOWED_KEYS: &[&str] = &[
    "type",
    "description",
    "enum",
    "items",
    "properties",
    "required",
    "nullable",
    "format",
];

/// Recursively filter a JSON-schema value down to the allowlisted keys.
/// Non-object values (and array elements) pass through unchanged except
/// that any nested objects within them are filtered too.
pub fn filter_schema(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut filtered = serde_json::Map::new();
            for key in ALLOWED_KEYS {
                if let Some(v) = map.get(*key) {
                    filtered.insert((*key).to_string(), filter_nested(*key, v));
                }
            }
            Value::Object(filtered)
        }
        Value::Array(items) => Value::Array(items.iter().map(filter_schema).collect()),
        other => other.clone(),
    }
}

fn filter_nested(key: &str, value: &Value) -> Value {
    match key {
        "properties" => match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), filter_schema(v)))
                    .collect(),
            ),
            other => other.clone(),
        },
        "items" => filter_schema(value),
        // enum/required/nullable/format/description/type pass through verbatim
        _ => value.clone(),
    }
}
