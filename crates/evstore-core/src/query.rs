//! Read-path normalization: name resolution, range checks, ordering, and
//! default backfilling.

use std::sync::Arc;

use evstore_schema::insert_defaults;
use evstore_types::{Event, IdFilter, IdSink, Query, StorageBackend, TimeQuery};
use tracing::debug;

use crate::cache::MetadataCache;
use crate::error::StoreError;

/// Limit applied to id streams that do not set one.
pub const DEFAULT_ID_LIMIT: u32 = 200;

/// Turns caller queries into backend calls and shapes the results.
pub struct QueryNormalizer {
    cache: Arc<MetadataCache>,
    backend: Arc<dyn StorageBackend>,
}

impl QueryNormalizer {
    pub fn new(cache: Arc<MetadataCache>, backend: Arc<dyn StorageBackend>) -> Self {
        Self { cache, backend }
    }

    /// Searches events, newest first.
    ///
    /// Ties on `event_time` are broken by `event_id`, also descending, so
    /// paging over equal timestamps is stable.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid event-time range; `Backend` when the
    /// search fails.
    pub fn find(&self, query: &Query) -> Result<Vec<Event>, StoreError> {
        validate_range(query.start_event_time, query.end_event_time)?;

        let topic_ids = resolve_all(&query.topic_name, |name| self.cache.resolve_topic_id(name));
        let dc_ids = resolve_all(&query.dc, |name| self.cache.resolve_dc_id(name));
        if topic_ids.matches_nothing() || dc_ids.matches_nothing() {
            debug!(
                topics = ?query.topic_name,
                dcs = ?query.dc,
                "no requested topic or dc resolved; returning empty result"
            );
        }

        let mut events = self
            .backend
            .search(query, &topic_ids, &dc_ids)
            .map_err(StoreError::backend("search"))?;
        events.sort_by(|a, b| {
            b.event_time
                .cmp(&a.event_time)
                .then_with(|| b.event_id.cmp(&a.event_id))
        });
        Ok(events)
    }

    /// Fetches one event, even if its topic has since been deleted, and
    /// backfills defaults from the topic's current schema.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; `Backend` when the fetch fails.
    pub fn find_by_id(&self, id: &str) -> Result<Event, StoreError> {
        let mut event = self
            .backend
            .fetch_by_id(id, true)
            .map_err(StoreError::backend("fetch_by_id"))?
            .ok_or_else(|| StoreError::NotFound(format!("event '{id}' does not exist")))?;

        if let Some(document) = self.cache.topic_schema_properties(&event.topic_id) {
            insert_defaults(&document, &mut event.data);
        }
        Ok(event)
    }

    /// Streams ids in an event-time window to `sink`.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid range; `Backend` when the scan fails or
    /// the sink closes early.
    pub fn find_ids(&self, query: &TimeQuery, sink: &mut IdSink<'_>) -> Result<(), StoreError> {
        validate_range(query.start_event_time, query.end_event_time)?;
        let mut query = query.clone();
        if query.limit == 0 {
            query.limit = DEFAULT_ID_LIMIT;
        }
        self.backend
            .stream_ids(&query, sink)
            .map_err(StoreError::backend("stream_ids"))
    }
}

/// Checks an event-time range: both bounds set, end not before start.
///
/// # Errors
///
/// `Validation` describing the first problem found.
pub fn validate_range(start: i64, end: i64) -> Result<(), StoreError> {
    if start == 0 || end == 0 {
        return Err(StoreError::Validation(
            "start_event_time and end_event_time must both be set".to_string(),
        ));
    }
    if end < start {
        return Err(StoreError::Validation(format!(
            "end_event_time {end} is before start_event_time {start}"
        )));
    }
    Ok(())
}

/// Resolves requested names. Names that fail to resolve contribute nothing,
/// so a list where none resolve yields a filter that matches nothing.
fn resolve_all(names: &[String], resolve: impl Fn(&str) -> Option<String>) -> IdFilter {
    if names.is_empty() {
        return IdFilter::Any;
    }
    let mut ids: Vec<String> = names.iter().filter_map(|name| resolve(name)).collect();
    ids.sort();
    ids.dedup();
    IdFilter::OneOf(ids)
}
