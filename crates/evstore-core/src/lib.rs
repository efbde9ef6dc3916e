//! Core of the evstore event store.
//!
//! Events are immutable records filed under a topic and a datacenter. A
//! topic may carry a JSON-Schema document that every event's `data` must
//! satisfy at write time. This crate owns the pieces between the transport
//! and the storage backend:
//!
//! - [`MetadataCache`]: case-insensitive topic and dc lookup tables with
//!   compiled schemas, behind two independent read-write locks.
//! - [`EventAugmenter`]: turns drafts into stored events (resolution,
//!   validation, id generation, time stamping).
//! - [`QueryNormalizer`]: validates ranges, resolves names to id filters,
//!   and orders results.
//! - [`reconcile()`]: rebuilds the cache from the backend and swaps it in.
//! - [`EventStore`]: the façade that ties them together and tracks
//!   backend failures.

pub mod augment;
pub mod cache;
pub mod clock;
pub mod error;
pub mod ids;
pub mod query;
pub mod reconcile;
pub mod store;

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;

pub use augment::{EventAugmenter, MAX_EVENT_TIME_SECS};
pub use cache::{CacheGeneration, MetadataCache, TopicEntry, TopicSchema};
pub use error::StoreError;
pub use ids::EventIdGenerator;
pub use query::{validate_range, QueryNormalizer, DEFAULT_ID_LIMIT};
pub use reconcile::{reconcile, ReconcileStats};
pub use store::{EventStore, FailureCounts};
