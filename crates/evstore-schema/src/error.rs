//! Error types for schema compilation and validation.

use std::fmt;

/// Errors that make a schema document unusable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// The document is not valid JSON.
    #[error("schema is not valid JSON: {0}")]
    Parse(String),

    /// A supported keyword is used with the wrong shape.
    #[error("invalid schema at {pointer}: {reason}")]
    Invalid {
        /// JSON pointer to the offending keyword.
        pointer: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// A single way a data document fails its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path to the failing value, `(root)` for the document itself.
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every violation found while validating one document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join(.0))]
pub struct SchemaViolations(pub Vec<Violation>);

impl SchemaViolations {
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
