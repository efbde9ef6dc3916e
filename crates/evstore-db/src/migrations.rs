//! Embedded, versioned schema migrations.
//!
//! The schema version lives in SQLite's `user_version` header field and
//! equals the number of steps applied. Each step runs in one transaction
//! together with its version bump.

use rusqlite::Connection;
use thiserror::Error;

struct Step {
    name: &'static str,
    sql: &'static str,
}

/// Append only. A step's position is its version.
const STEPS: &[Step] = &[
    Step {
        name: "001_metadata",
        sql: include_str!("migrations/001_metadata.sql"),
    },
    Step {
        name: "002_events",
        sql: include_str!("migrations/002_events.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    #[error("database schema version {found} is newer than this build knows ({known})")]
    TooNew { found: i64, known: usize },
}

/// Brings the database up to the latest schema. Returns how many steps ran.
///
/// # Errors
///
/// Stops at the first failing step; earlier ones stay applied. A database
/// written by a newer build is refused untouched.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    upgrade(conn, STEPS)
}

fn schema_version(conn: &Connection) -> Result<i64, MigrationError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(MigrationError::StateQuery)
}

fn upgrade(conn: &Connection, steps: &[Step]) -> Result<usize, MigrationError> {
    let found = schema_version(conn)?;
    let current = usize::try_from(found)
        .ok()
        .filter(|v| *v <= steps.len())
        .ok_or(MigrationError::TooNew {
            found,
            known: steps.len(),
        })?;

    let pending = &steps[current..];
    if pending.is_empty() {
        tracing::debug!(version = current, "event schema is current");
    }
    for (version, step) in (current + 1..).zip(pending) {
        tracing::info!(migration = step.name, version, "applying migration");
        run_step(conn, step, version).map_err(|source| MigrationError::ExecutionFailed {
            name: step.name.to_string(),
            source,
        })?;
    }
    Ok(pending.len())
}

fn run_step(conn: &Connection, step: &Step, version: usize) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(step.sql)?;
    tx.pragma_update(None, "user_version", version as i64)?;
    tx.commit()
}
