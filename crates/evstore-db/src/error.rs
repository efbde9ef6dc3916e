use evstore_types::BackendError;

/// Failures inside the SQLite backend.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("stored JSON could not be read or written: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} {id} does not exist")]
    Missing { kind: &'static str, id: String },

    #[error("backend is closed")]
    Closed,
}

impl DbError {
    fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}

impl From<DbError> for BackendError {
    fn from(err: DbError) -> Self {
        if err.is_unique_violation() {
            return BackendError::Conflict(err.to_string());
        }
        match err {
            DbError::Pool(_) | DbError::Closed => BackendError::Unavailable(err.to_string()),
            DbError::Serialization(_) => BackendError::Corrupt(err.to_string()),
            DbError::Sqlite(_) | DbError::Missing { .. } => BackendError::Query(err.to_string()),
        }
    }
}
