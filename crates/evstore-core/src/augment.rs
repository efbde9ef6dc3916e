//! Turns client drafts into stored events.

use std::sync::Arc;

use evstore_types::{Event, UnaddedEvent};
use serde_json::Value;

use crate::cache::MetadataCache;
use crate::clock;
use crate::error::StoreError;
use crate::ids::EventIdGenerator;

/// Latest `event_time` whose millisecond value fits an event id's 48-bit
/// timestamp.
pub const MAX_EVENT_TIME_SECS: i64 = ((1 << 48) - 1) / 1_000;

/// Resolves, validates, and stamps drafts.
///
/// Each cache lookup takes and releases its own read guard; nothing is held
/// while a schema is evaluated. A topic id resolved here stays valid even
/// if the topic is renamed before the event is written.
#[derive(Debug)]
pub struct EventAugmenter {
    cache: Arc<MetadataCache>,
    ids: EventIdGenerator,
}

impl EventAugmenter {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self {
            cache,
            ids: EventIdGenerator::new(),
        }
    }

    /// Consumes a draft and produces a fully populated event.
    ///
    /// # Errors
    ///
    /// - `Validation` when `dc`, `host`, or `topic_name` is empty, or
    ///   `event_time` is negative or later than [`MAX_EVENT_TIME_SECS`].
    /// - `NotFound` when the dc or topic is not registered.
    /// - `SchemaViolation` when `data` fails the topic's schema.
    pub fn augment(&self, draft: UnaddedEvent) -> Result<Event, StoreError> {
        for (field, value) in [
            ("dc", &draft.dc),
            ("host", &draft.host),
            ("topic_name", &draft.topic_name),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::Validation(format!("event missing {field}")));
            }
        }

        let event_time = match draft.event_time {
            0 => clock::now_secs(),
            t if t < 0 => {
                return Err(StoreError::Validation(format!(
                    "event_time must not be negative, got {t}"
                )))
            }
            t if t > MAX_EVENT_TIME_SECS => {
                return Err(StoreError::Validation(format!(
                    "event_time must not exceed {MAX_EVENT_TIME_SECS}, got {t}"
                )))
            }
            t => t,
        };

        let dc_id = self.cache.resolve_dc_id(&draft.dc).ok_or_else(|| {
            StoreError::NotFound(format!(
                "dc '{}' does not exist in dc table",
                draft.dc.to_lowercase()
            ))
        })?;
        let topic_id = self.cache.resolve_topic_id(&draft.topic_name).ok_or_else(|| {
            StoreError::NotFound(format!(
                "topic '{}' does not exist in topic table",
                draft.topic_name.to_lowercase()
            ))
        })?;

        let data = draft.data.unwrap_or_default();
        if let Some(schema) = self.cache.topic_schema(&topic_id) {
            schema.validate(&Value::Object(data.clone()))?;
        }

        let event_id = self.ids.generate(event_time);

        Ok(Event {
            event_id,
            parent_event_id: draft.parent_event_id,
            event_time: event_time.saturating_mul(1_000),
            dc_id,
            topic_id,
            tags: draft.tags,
            host: draft.host,
            target_hosts: draft.target_hosts,
            user: draft.user,
            data,
            received_time: clock::now_millis(),
        })
    }
}
