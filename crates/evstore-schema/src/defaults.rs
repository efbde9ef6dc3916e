//! Read-path default backfilling.

use serde_json::{Map, Value};

/// Inserts declared `default` values for properties missing from `data`.
///
/// Nested objects already present in `data` are filled recursively. Values
/// that are present are never overwritten.
pub fn insert_defaults(schema: &Value, data: &mut Map<String, Value>) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };

    for (name, prop) in properties {
        match data.get_mut(name) {
            None => {
                if let Some(default) = prop.get("default") {
                    data.insert(name.clone(), default.clone());
                }
            }
            Some(Value::Object(nested)) => insert_defaults(prop, nested),
            Some(_) => {}
        }
    }
}
