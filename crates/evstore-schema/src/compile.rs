//! Schema compilation and data validation.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::{SchemaError, SchemaViolations, Violation};

/// The JSON value kinds a `type` keyword can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JsonType {
    Null,
    Boolean,
    Object,
    Array,
    Number,
    Integer,
    String,
}

impl JsonType {
    /// Returns the canonical keyword spelling for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::String => "string",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "null" => Some(Self::Null),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            "number" => Some(Self::Number),
            "integer" => Some(Self::Integer),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    /// Classifies a JSON value. Numbers without a fractional part are integers.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::String(_) => Self::String,
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0) {
                    Self::Integer
                } else {
                    Self::Number
                }
            }
        }
    }

    /// Whether a value of kind `actual` satisfies this declared type.
    pub fn admits(self, actual: JsonType) -> bool {
        self == actual || (self == Self::Number && actual == Self::Integer)
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
enum Additional {
    #[default]
    Allowed,
    Forbidden,
    Schema(Box<Node>),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Node {
    reject_all: bool,
    types: Option<Vec<JsonType>>,
    properties: BTreeMap<String, Node>,
    required: Vec<String>,
    additional: Additional,
    items: Option<Box<Node>>,
    enum_values: Option<Vec<Value>>,
    const_value: Option<Value>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    exclusive_minimum: Option<f64>,
    exclusive_maximum: Option<f64>,
    min_length: Option<u64>,
    max_length: Option<u64>,
    min_items: Option<u64>,
    max_items: Option<u64>,
    unique_items: bool,
    multiple_of: Option<f64>,
    all_of: Vec<Node>,
    any_of: Vec<Node>,
    one_of: Vec<Node>,
    not: Option<Box<Node>>,
}

/// Keywords [`compile`] evaluates.
pub const SUPPORTED_KEYWORDS: &[&str] = &[
    "type",
    "properties",
    "required",
    "additionalProperties",
    "items",
    "enum",
    "const",
    "minimum",
    "maximum",
    "exclusiveMinimum",
    "exclusiveMaximum",
    "multipleOf",
    "minLength",
    "maxLength",
    "minItems",
    "maxItems",
    "uniqueItems",
    "allOf",
    "anyOf",
    "oneOf",
    "not",
    "default",
];

/// Keywords that carry no constraint.
const ANNOTATIONS: &[&str] = &["$schema", "$id", "id", "$comment", "title", "description", "examples"];

/// A schema document checked for well-formedness and ready to evaluate.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSchema {
    root: Node,
}

/// Returns true for documents that impose no constraint at all.
pub fn is_unconstrained(document: &Value) -> bool {
    match document {
        Value::Null | Value::Bool(true) => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Compiles a schema document.
///
/// `null` and `{}` compile to a schema that accepts every document.
///
/// # Errors
///
/// Returns `SchemaError::Invalid` when a keyword is malformed or is not
/// one the store can enforce.
pub fn compile(document: &Value) -> Result<CompiledSchema, SchemaError> {
    let root = match document {
        Value::Null => Node::default(),
        other => compile_node(other, "")?,
    };
    Ok(CompiledSchema { root })
}

/// Parses and compiles a serialized schema document. An empty string is
/// treated like `{}`.
///
/// # Errors
///
/// Returns `SchemaError::Parse` for invalid JSON, otherwise as [`compile`].
pub fn compile_str(document: &str) -> Result<CompiledSchema, SchemaError> {
    if document.trim().is_empty() {
        return compile(&Value::Null);
    }
    let value: Value =
        serde_json::from_str(document).map_err(|e| SchemaError::Parse(e.to_string()))?;
    compile(&value)
}

fn invalid(pointer: &str, keyword: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        pointer: format!("{pointer}/{}", escape_pointer(keyword)),
        reason: reason.into(),
    }
}

fn escape_pointer(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn compile_node(value: &Value, pointer: &str) -> Result<Node, SchemaError> {
    let map = match value {
        Value::Bool(true) => return Ok(Node::default()),
        Value::Bool(false) => {
            return Ok(Node {
                reject_all: true,
                ..Node::default()
            })
        }
        Value::Object(map) => map,
        _ => {
            return Err(SchemaError::Invalid {
                pointer: if pointer.is_empty() { "/".to_string() } else { pointer.to_string() },
                reason: "schema must be an object or a boolean".to_string(),
            })
        }
    };

    if let Some(keyword) = map
        .keys()
        .find(|k| !SUPPORTED_KEYWORDS.contains(&k.as_str()) && !ANNOTATIONS.contains(&k.as_str()))
    {
        return Err(invalid(pointer, keyword, "keyword is not supported"));
    }

    let mut node = Node {
        types: compile_types(map, pointer)?,
        ..Node::default()
    };

    if let Some(props) = map.get("properties") {
        let props = props
            .as_object()
            .ok_or_else(|| invalid(pointer, "properties", "must be an object"))?;
        for (name, sub) in props {
            let sub_pointer = format!("{pointer}/properties/{}", escape_pointer(name));
            node.properties.insert(name.clone(), compile_node(sub, &sub_pointer)?);
        }
    }

    if let Some(required) = map.get("required") {
        let list = required
            .as_array()
            .ok_or_else(|| invalid(pointer, "required", "must be an array of strings"))?;
        for entry in list {
            let name = entry
                .as_str()
                .ok_or_else(|| invalid(pointer, "required", "must be an array of strings"))?;
            if !node.required.iter().any(|r| r == name) {
                node.required.push(name.to_string());
            }
        }
    }

    node.additional = match map.get("additionalProperties") {
        None | Some(Value::Bool(true)) => Additional::Allowed,
        Some(Value::Bool(false)) => Additional::Forbidden,
        Some(sub @ Value::Object(_)) => Additional::Schema(Box::new(compile_node(
            sub,
            &format!("{pointer}/additionalProperties"),
        )?)),
        Some(_) => {
            return Err(invalid(
                pointer,
                "additionalProperties",
                "must be a boolean or a schema",
            ))
        }
    };

    node.items = match map.get("items") {
        None => None,
        Some(Value::Array(_)) => {
            return Err(invalid(pointer, "items", "array form of items is not supported"))
        }
        Some(sub) => Some(Box::new(compile_node(sub, &format!("{pointer}/items"))?)),
    };

    if let Some(values) = map.get("enum") {
        let values = values
            .as_array()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(pointer, "enum", "must be a non-empty array"))?;
        node.enum_values = Some(values.clone());
    }
    node.const_value = map.get("const").cloned();

    (node.minimum, node.exclusive_minimum) =
        bound_keywords(map, pointer, "minimum", "exclusiveMinimum")?;
    (node.maximum, node.exclusive_maximum) =
        bound_keywords(map, pointer, "maximum", "exclusiveMaximum")?;
    node.multiple_of = number_keyword(map, pointer, "multipleOf")?;
    if node.multiple_of.is_some_and(|m| m <= 0.0) {
        return Err(invalid(pointer, "multipleOf", "must be greater than 0"));
    }
    node.min_length = count_keyword(map, pointer, "minLength")?;
    node.max_length = count_keyword(map, pointer, "maxLength")?;
    node.min_items = count_keyword(map, pointer, "minItems")?;
    node.max_items = count_keyword(map, pointer, "maxItems")?;
    node.unique_items = match map.get("uniqueItems") {
        None => false,
        Some(Value::Bool(unique)) => *unique,
        Some(_) => return Err(invalid(pointer, "uniqueItems", "must be a boolean")),
    };

    node.all_of = schema_list(map, pointer, "allOf")?;
    node.any_of = schema_list(map, pointer, "anyOf")?;
    node.one_of = schema_list(map, pointer, "oneOf")?;
    if let Some(sub) = map.get("not") {
        node.not = Some(Box::new(compile_node(sub, &format!("{pointer}/not"))?));
    }

    Ok(node)
}

fn schema_list(
    map: &Map<String, Value>,
    pointer: &str,
    keyword: &str,
) -> Result<Vec<Node>, SchemaError> {
    let Some(value) = map.get(keyword) else {
        return Ok(Vec::new());
    };
    let list = value
        .as_array()
        .filter(|list| !list.is_empty())
        .ok_or_else(|| invalid(pointer, keyword, "must be a non-empty array of schemas"))?;
    list.iter()
        .enumerate()
        .map(|(i, sub)| compile_node(sub, &format!("{pointer}/{keyword}/{i}")))
        .collect()
}

/// Reads a bound and its exclusive companion. The companion may be a number
/// or, in the draft-4 form, a boolean that makes the bound itself exclusive.
/// Returns `(inclusive, exclusive)`.
fn bound_keywords(
    map: &Map<String, Value>,
    pointer: &str,
    keyword: &str,
    exclusive: &str,
) -> Result<(Option<f64>, Option<f64>), SchemaError> {
    let inclusive = number_keyword(map, pointer, keyword)?;
    match map.get(exclusive) {
        None | Some(Value::Bool(false)) => Ok((inclusive, None)),
        Some(Value::Bool(true)) => inclusive
            .map(|bound| (None, Some(bound)))
            .ok_or_else(|| invalid(pointer, exclusive, format!("requires {keyword}"))),
        Some(v) => v
            .as_f64()
            .map(|bound| (inclusive, Some(bound)))
            .ok_or_else(|| invalid(pointer, exclusive, "must be a number or a boolean")),
    }
}

fn compile_types(map: &Map<String, Value>, pointer: &str) -> Result<Option<Vec<JsonType>>, SchemaError> {
    let parse_one = |v: &Value| -> Result<JsonType, SchemaError> {
        let name = v
            .as_str()
            .ok_or_else(|| invalid(pointer, "type", "type names must be strings"))?;
        JsonType::parse(name).ok_or_else(|| invalid(pointer, "type", format!("unknown type '{name}'")))
    };

    match map.get("type") {
        None => Ok(None),
        Some(Value::Array(names)) if names.is_empty() => {
            Err(invalid(pointer, "type", "must name at least one type"))
        }
        Some(Value::Array(names)) => names.iter().map(parse_one).collect::<Result<_, _>>().map(Some),
        Some(single) => parse_one(single).map(|t| Some(vec![t])),
    }
}

fn number_keyword(
    map: &Map<String, Value>,
    pointer: &str,
    keyword: &str,
) -> Result<Option<f64>, SchemaError> {
    match map.get(keyword) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(pointer, keyword, "must be a number")),
    }
}

fn count_keyword(
    map: &Map<String, Value>,
    pointer: &str,
    keyword: &str,
) -> Result<Option<u64>, SchemaError> {
    match map.get(keyword) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(pointer, keyword, "must be a non-negative integer")),
    }
}

impl CompiledSchema {
    /// True when the schema accepts every document.
    pub fn is_unconstrained(&self) -> bool {
        self.root == Node::default()
    }

    /// Validates a data document, collecting every violation.
    ///
    /// # Errors
    ///
    /// Returns all violations found, in document order.
    pub fn validate(&self, data: &Value) -> Result<(), SchemaViolations> {
        let mut violations = Vec::new();
        self.root.check(data, "(root)", &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SchemaViolations(violations))
        }
    }
}

fn child_path(parent: &str, segment: &str) -> String {
    if parent == "(root)" {
        segment.to_string()
    } else {
        format!("{parent}.{segment}")
    }
}

impl Node {
    fn check(&self, value: &Value, path: &str, out: &mut Vec<Violation>) {
        let mut fail = |message: String| {
            out.push(Violation {
                path: path.to_string(),
                message,
            })
        };

        if self.reject_all {
            fail("no value is allowed here".to_string());
            return;
        }

        if let Some(types) = &self.types {
            let actual = JsonType::of(value);
            if !types.iter().any(|t| t.admits(actual)) {
                let expected = types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ");
                fail(format!("invalid type, expected: {expected}, given: {actual}"));
                return;
            }
        }

        if let Some(values) = &self.enum_values {
            if !values.contains(value) {
                fail("must be one of the enumerated values".to_string());
            }
        }
        if let Some(expected) = &self.const_value {
            if expected != value {
                fail(format!("does not match: {expected}"));
            }
        }

        match value {
            Value::Number(n) => {
                if let Some(n) = n.as_f64() {
                    self.check_number(n, &mut fail);
                }
            }
            Value::String(s) => {
                let len = s.chars().count() as u64;
                if let Some(min) = self.min_length.filter(|min| len < *min) {
                    fail(format!("string length must be greater than or equal to {min}"));
                }
                if let Some(max) = self.max_length.filter(|max| len > *max) {
                    fail(format!("string length must be less than or equal to {max}"));
                }
            }
            Value::Array(items) => {
                let len = items.len() as u64;
                if let Some(min) = self.min_items.filter(|min| len < *min) {
                    fail(format!("array must have at least {min} items"));
                }
                if let Some(max) = self.max_items.filter(|max| len > *max) {
                    fail(format!("array must have at most {max} items"));
                }
                if self.unique_items && has_duplicates(items) {
                    fail("array items must be unique".to_string());
                }
            }
            _ => {}
        }

        match value {
            Value::Array(items) => {
                if let Some(item_schema) = &self.items {
                    for (i, item) in items.iter().enumerate() {
                        item_schema.check(item, &child_path(path, &i.to_string()), out);
                    }
                }
            }
            Value::Object(map) => self.check_object(map, path, out),
            _ => {}
        }

        self.check_composition(value, path, out);
    }

    fn check_composition(&self, value: &Value, path: &str, out: &mut Vec<Violation>) {
        for sub in &self.all_of {
            sub.check(value, path, out);
        }

        let mut fail = |message: String| {
            out.push(Violation {
                path: path.to_string(),
                message,
            })
        };
        if !self.any_of.is_empty() && !self.any_of.iter().any(|sub| sub.accepts(value)) {
            fail("must match at least one schema in anyOf".to_string());
        }
        if !self.one_of.is_empty() {
            let matched = self.one_of.iter().filter(|sub| sub.accepts(value)).count();
            if matched != 1 {
                fail(format!("must match exactly one schema in oneOf, matched {matched}"));
            }
        }
        if self.not.as_ref().is_some_and(|sub| sub.accepts(value)) {
            fail("must not match the schema in not".to_string());
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        let mut scratch = Vec::new();
        self.check(value, "(root)", &mut scratch);
        scratch.is_empty()
    }

    fn check_number(&self, n: f64, fail: &mut impl FnMut(String)) {
        if let Some(min) = self.minimum.filter(|min| n < *min) {
            fail(format!("must be greater than or equal to {min}"));
        }
        if let Some(max) = self.maximum.filter(|max| n > *max) {
            fail(format!("must be less than or equal to {max}"));
        }
        if let Some(min) = self.exclusive_minimum.filter(|min| n <= *min) {
            fail(format!("must be greater than {min}"));
        }
        if let Some(max) = self.exclusive_maximum.filter(|max| n >= *max) {
            fail(format!("must be less than {max}"));
        }
        if let Some(factor) = self.multiple_of {
            let quotient = n / factor;
            if (quotient - quotient.round()).abs() > 1e-9 {
                fail(format!("must be a multiple of {factor}"));
            }
        }
    }

    fn check_object(&self, map: &Map<String, Value>, path: &str, out: &mut Vec<Violation>) {
        for name in &self.required {
            if !map.contains_key(name) {
                out.push(Violation {
                    path: path.to_string(),
                    message: format!("{name} is required"),
                });
            }
        }

        for (key, value) in map {
            let child = child_path(path, key);
            match self.properties.get(key) {
                Some(prop) => prop.check(value, &child, out),
                None => match &self.additional {
                    Additional::Allowed => {}
                    Additional::Forbidden => out.push(Violation {
                        path: path.to_string(),
                        message: format!("additional property {key} is not allowed"),
                    }),
                    Additional::Schema(schema) => schema.check(value, &child, out),
                },
            }
        }
    }
}

fn has_duplicates(items: &[Value]) -> bool {
    items
        .iter()
        .enumerate()
        .any(|(i, item)| items[i + 1..].contains(item))
}
