//! Error taxonomy for store operations.

use evstore_schema::SchemaViolations;
use evstore_types::BackendError;

/// Errors surfaced by [`crate::EventStore`] operations.
///
/// None of these are retried inside the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing field, malformed schema, or invalid time range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown topic, dc, or event id. A normal negative result.
    #[error("not found: {0}")]
    NotFound(String),

    /// Data failed its schema, or a schema change broke compatibility.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Duplicate topic or dc name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The storage backend failed.
    #[error("{operation} failed: {source}")]
    Backend {
        /// The backend call that failed.
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl StoreError {
    /// Builds a mapper that wraps a backend error with operation context.
    pub fn backend(operation: &'static str) -> impl FnOnce(BackendError) -> Self {
        move |source| Self::Backend { operation, source }
    }

    /// Like [`StoreError::backend`], but a uniqueness collision reported by
    /// the backend becomes `Conflict` naming `what`.
    pub fn name_write(
        operation: &'static str,
        what: String,
    ) -> impl FnOnce(BackendError) -> Self {
        move |source| match source {
            BackendError::Conflict(_) => Self::Conflict(format!("{what} already exists")),
            source => Self::Backend { operation, source },
        }
    }

    /// True when the dependency, not the caller, is at fault.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend { .. })
    }
}

impl From<SchemaViolations> for StoreError {
    fn from(violations: SchemaViolations) -> Self {
        Self::SchemaViolation(violations.to_string())
    }
}
