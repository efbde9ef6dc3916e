//! The contract the core requires from a durable storage backend.

use thiserror::Error;

use crate::{Dc, Event, IdFilter, Query, RawTopic, TimeQuery};

/// Failures reported by a storage backend.
///
/// These are the only errors that indicate the dependency, rather than
/// caller input, is at fault.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store could not be reached (pool exhausted, file unavailable).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A read or write statement failed.
    #[error("storage query failed: {0}")]
    Query(String),

    /// A persisted record could not be decoded.
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    /// A write collided with a uniqueness constraint, usually a name
    /// claimed by another process after the caller's cache was loaded.
    #[error("storage constraint violated: {0}")]
    Conflict(String),

    /// The consumer of a streamed result went away.
    #[error("result sink closed")]
    SinkClosed,
}

/// Receives ids one at a time from [`StorageBackend::stream_ids`].
///
/// Returning an error stops the stream; flow control is the sink's job.
pub type IdSink<'a> = dyn FnMut(String) -> Result<(), BackendError> + 'a;

/// Durable persistence and search for events, topics, and datacenters.
///
/// All calls block the calling thread. Callers check name uniqueness
/// against their cache first; a backend still reports a live-name collision
/// it detects itself as [`BackendError::Conflict`].
pub trait StorageBackend: Send + Sync {
    fn write_event(&self, event: &Event) -> Result<(), BackendError>;

    /// Returns matching events in any order.
    fn search(
        &self,
        query: &Query,
        topic_ids: &IdFilter,
        dc_ids: &IdFilter,
    ) -> Result<Vec<Event>, BackendError>;

    /// Fetches one event. With `include_soft_deleted` unset, events whose
    /// topic has been deleted are hidden.
    fn fetch_by_id(&self, id: &str, include_soft_deleted: bool)
        -> Result<Option<Event>, BackendError>;

    fn stream_ids(&self, query: &TimeQuery, sink: &mut IdSink<'_>) -> Result<(), BackendError>;

    fn put_topic(&self, topic: &RawTopic) -> Result<(), BackendError>;

    /// Renames a topic and/or replaces its schema.
    fn update_topic(&self, topic: &RawTopic) -> Result<(), BackendError>;

    fn delete_topic(&self, id: &str) -> Result<(), BackendError>;

    /// Lists live (not deleted) topics.
    fn list_topics(&self) -> Result<Vec<RawTopic>, BackendError>;

    fn put_dc(&self, dc: &Dc) -> Result<(), BackendError>;

    fn update_dc(&self, id: &str, new_name: &str) -> Result<(), BackendError>;

    fn list_dcs(&self) -> Result<Vec<Dc>, BackendError>;

    /// Releases backend resources. Further calls may fail.
    fn close(&self);
}
