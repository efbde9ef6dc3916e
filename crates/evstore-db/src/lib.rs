//! SQLite storage for the evstore event store.
//!
//! [`SqliteBackend`] implements [`evstore_types::StorageBackend`] over an
//! `r2d2` pool of WAL-mode connections. The schema is created and upgraded
//! by embedded migrations that run when the backend is opened.
//!
//! Times are stored in milliseconds; query bounds arrive in seconds and are
//! scaled here. Topics are soft-deleted: their events drop out of searches
//! but stay fetchable by id when the caller asks for them.

mod backend;
mod error;
mod migrations;
mod pool;

pub use backend::{OpenError, SqliteBackend};
pub use error::DbError;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
