//! Backward-compatibility checks for schema evolution.
//!
//! A replacement schema is compatible when every document the current
//! schema accepts is still accepted. Checked per schema node:
//!
//! - every required field stays required and declared, and no new field
//!   becomes required;
//! - the `type` set only widens (`number` covers `integer`, an absent `type`
//!   means any);
//! - `enum` and `const` keep every previously allowed value;
//! - numeric bounds, length and item-count limits, and `multipleOf` only
//!   loosen, and `uniqueItems` is not newly required;
//! - additional properties are not newly forbidden or constrained;
//! - `allOf`, `anyOf`, `oneOf`, and `not` are unchanged or dropped.
//!
//! The rules recurse into `items`, schema-valued `additionalProperties`, and
//! properties present in both schemas. New optional properties are always
//! allowed.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::compile::is_unconstrained;

const COMPOSITION: [&str; 4] = ["allOf", "anyOf", "oneOf", "not"];

static ANY: Value = Value::Bool(true);

/// Returns true when `new` can replace `old` without invalidating data that
/// `old` accepted.
pub fn is_backward_compatible(old: &Value, new: &Value) -> bool {
    incompatibilities(old, new).is_empty()
}

/// Lists every reason `new` cannot replace `old`. Empty when compatible.
pub fn incompatibilities(old: &Value, new: &Value) -> Vec<String> {
    let mut reasons = Vec::new();
    if !is_unconstrained(old) {
        check_node(old, new, "(root)", &mut reasons);
    }
    reasons
}

static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();

fn as_schema(value: &Value) -> &Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => EMPTY.get_or_init(Map::new),
    }
}

fn child(path: &str, name: &str) -> String {
    if path == "(root)" {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn required(schema: &Map<String, Value>) -> BTreeSet<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|list| list.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn properties(schema: &Map<String, Value>) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

fn type_set(schema: &Map<String, Value>) -> Option<BTreeSet<&str>> {
    match schema.get("type")? {
        Value::String(name) => Some(BTreeSet::from([name.as_str()])),
        Value::Array(names) => Some(names.iter().filter_map(Value::as_str).collect()),
        _ => None,
    }
}

fn widens(old: Option<BTreeSet<&str>>, new: Option<BTreeSet<&str>>) -> bool {
    match (old, new) {
        (_, None) => true,
        (None, Some(_)) => false,
        (Some(old), Some(new)) => old
            .iter()
            .all(|t| new.contains(t) || (*t == "integer" && new.contains("number"))),
    }
}

enum Additional<'a> {
    Allowed,
    Forbidden,
    Schema(&'a Value),
}

fn additional(schema: &Map<String, Value>) -> Additional<'_> {
    match schema.get("additionalProperties") {
        Some(Value::Bool(false)) => Additional::Forbidden,
        Some(sub @ Value::Object(_)) => Additional::Schema(sub),
        _ => Additional::Allowed,
    }
}

/// Values a node admits when it carries `const` or `enum`; `None` means any.
fn allowed_values(schema: &Map<String, Value>) -> Option<Vec<&Value>> {
    if let Some(value) = schema.get("const") {
        return Some(vec![value]);
    }
    schema
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| values.iter().collect())
}

/// A numeric bound and whether it is exclusive.
type Bound = (f64, bool);

/// Reads the effective bound from a keyword and its exclusive companion,
/// keeping the tighter of the two. `tighter(a, b)` is true when `a` admits
/// less than `b`.
fn bound(
    schema: &Map<String, Value>,
    keyword: &str,
    exclusive: &str,
    tighter: fn(f64, f64) -> bool,
) -> Option<Bound> {
    let inclusive = schema.get(keyword).and_then(Value::as_f64);
    match schema.get(exclusive) {
        Some(Value::Bool(true)) => inclusive.map(|b| (b, true)),
        Some(other) => match (inclusive, other.as_f64()) {
            (Some(i), Some(e)) if tighter(i, e) => Some((i, false)),
            (_, Some(e)) => Some((e, true)),
            (i, None) => i.map(|b| (b, false)),
        },
        None => inclusive.map(|b| (b, false)),
    }
}

fn bound_narrowed(old: Option<Bound>, new: Option<Bound>, tighter: fn(f64, f64) -> bool) -> bool {
    match (old, new) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(old), Some(new)) => tighter(new.0, old.0) || (new.0 == old.0 && new.1 && !old.1),
    }
}

fn count(schema: &Map<String, Value>, keyword: &str) -> Option<u64> {
    schema.get(keyword).and_then(Value::as_u64)
}

fn check_node(old: &Value, new: &Value, path: &str, reasons: &mut Vec<String>) {
    match (old, new) {
        (Value::Bool(false), _) => return,
        (_, Value::Bool(false)) => {
            reasons.push(format!("{path}: schema now rejects every value"));
            return;
        }
        _ => {}
    }
    let (old, new) = (as_schema(old), as_schema(new));

    check_required(old, new, path, reasons);

    if !widens(type_set(old), type_set(new)) {
        reasons.push(format!("{path}: type was narrowed"));
    }

    check_values(old, new, path, reasons);
    check_limits(old, new, path, reasons);

    for keyword in COMPOSITION {
        if let Some(value) = new.get(keyword) {
            if old.get(keyword) != Some(value) {
                reasons.push(format!("{path}: {keyword} was added or changed"));
            }
        }
    }

    match (additional(old), additional(new)) {
        (Additional::Forbidden, _) | (_, Additional::Allowed) => {}
        (_, Additional::Forbidden) => {
            reasons.push(format!("{path}: additional properties are newly forbidden"));
        }
        (Additional::Allowed, Additional::Schema(_)) => {
            reasons.push(format!("{path}: additional properties are newly constrained"));
        }
        (Additional::Schema(old_sub), Additional::Schema(new_sub)) => {
            check_node(old_sub, new_sub, &child(path, "*"), reasons);
        }
    }

    if let Some(new_items) = new.get("items") {
        let old_items = old.get("items").unwrap_or(&ANY);
        let item_path = if path == "(root)" {
            "[]".to_string()
        } else {
            format!("{path}[]")
        };
        check_node(old_items, new_items, &item_path, reasons);
    }

    let (Some(old_props), Some(new_props)) = (properties(old), properties(new)) else {
        return;
    };
    for (name, old_prop) in old_props {
        if let Some(new_prop) = new_props.get(name) {
            check_node(old_prop, new_prop, &child(path, name), reasons);
        }
    }
}

fn check_required(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
    reasons: &mut Vec<String>,
) {
    let old_required = required(old);
    let new_required = required(new);
    let new_props = properties(new);

    for field in &old_required {
        if !new_required.contains(field) {
            reasons.push(format!("{path}: required field {field} is no longer required"));
        } else if !new_props.is_some_and(|p| p.contains_key(*field)) {
            reasons.push(format!("{path}: required field {field} is no longer declared"));
        }
    }

    for field in new_required.difference(&old_required) {
        reasons.push(format!("{path}: field {field} is newly required"));
    }
}

fn check_values(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
    reasons: &mut Vec<String>,
) {
    let previous = allowed_values(old);
    let keeps_all = |admits: &dyn Fn(&Value) -> bool| {
        previous
            .as_ref()
            .is_some_and(|values| values.iter().all(|v| admits(v)))
    };

    if let Some(values) = new.get("enum").and_then(Value::as_array) {
        if !keeps_all(&|v| values.contains(v)) {
            reasons.push(format!("{path}: enum no longer allows every previous value"));
        }
    }
    if let Some(value) = new.get("const") {
        if !keeps_all(&|v| v == value) {
            reasons.push(format!("{path}: const no longer allows every previous value"));
        }
    }
}

fn check_limits(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    path: &str,
    reasons: &mut Vec<String>,
) {
    let above = |a: f64, b: f64| a > b;
    let below = |a: f64, b: f64| a < b;
    if bound_narrowed(
        bound(old, "minimum", "exclusiveMinimum", above),
        bound(new, "minimum", "exclusiveMinimum", above),
        above,
    ) {
        reasons.push(format!("{path}: lower bound was raised"));
    }
    if bound_narrowed(
        bound(old, "maximum", "exclusiveMaximum", below),
        bound(new, "maximum", "exclusiveMaximum", below),
        below,
    ) {
        reasons.push(format!("{path}: upper bound was lowered"));
    }

    for keyword in ["minLength", "minItems"] {
        if count(new, keyword).is_some_and(|n| n > count(old, keyword).unwrap_or(0)) {
            reasons.push(format!("{path}: {keyword} was raised"));
        }
    }
    for keyword in ["maxLength", "maxItems"] {
        if count(new, keyword).is_some_and(|n| count(old, keyword).map_or(true, |o| n < o)) {
            reasons.push(format!("{path}: {keyword} was lowered"));
        }
    }

    if let Some(factor) = new.get("multipleOf").and_then(Value::as_f64) {
        let divides_old = old
            .get("multipleOf")
            .and_then(Value::as_f64)
            .is_some_and(|o| {
                let quotient = o / factor;
                (quotient - quotient.round()).abs() < 1e-9
            });
        if !divides_old {
            reasons.push(format!("{path}: multipleOf was tightened"));
        }
    }

    let unique = |schema: &Map<String, Value>| schema.get("uniqueItems") == Some(&Value::Bool(true));
    if unique(new) && !unique(old) {
        reasons.push(format!("{path}: uniqueItems was added"));
    }
}
