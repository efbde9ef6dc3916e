//! The event store façade: ingestion, queries, and topic/dc administration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use evstore_schema::incompatibilities;
use evstore_types::{
    Dc, Event, IdSink, Query, RawTopic, StorageBackend, TimeQuery, Topic, UnaddedEvent,
    EMPTY_SCHEMA,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::augment::EventAugmenter;
use crate::cache::{MetadataCache, TopicEntry, TopicSchema};
use crate::error::StoreError;
use crate::query::QueryNormalizer;
use crate::reconcile::{self, ReconcileStats};

/// Snapshot of infrastructure failures since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureCounts {
    pub read_failures: u64,
    pub write_failures: u64,
}

#[derive(Debug, Default)]
struct FailureCounters {
    reads: AtomicU64,
    writes: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Read,
    Write,
}

/// Governed-schema event store.
///
/// All methods block on the backend; async callers should run them on a
/// blocking thread.
pub struct EventStore {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<MetadataCache>,
    augmenter: EventAugmenter,
    queries: QueryNormalizer,
    failures: FailureCounters,
}

impl EventStore {
    /// Creates a store with an empty cache. Call [`EventStore::refresh`]
    /// before serving to load existing topics and dcs.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let cache = Arc::new(MetadataCache::new());
        Self {
            augmenter: EventAugmenter::new(Arc::clone(&cache)),
            queries: QueryNormalizer::new(Arc::clone(&cache), Arc::clone(&backend)),
            backend,
            cache,
            failures: FailureCounters::default(),
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Validates, stamps, and persists one event. Returns its id.
    ///
    /// Nothing is written unless every check passes.
    pub fn add_event(&self, draft: UnaddedEvent) -> Result<String, StoreError> {
        let result = self.augmenter.augment(draft).and_then(|event| {
            self.backend
                .write_event(&event)
                .map_err(StoreError::backend("write_event"))?;
            debug!(event_id = %event.event_id, topic_id = %event.topic_id, "event stored");
            Ok(event.event_id)
        });
        self.observe(Direction::Write, result)
    }

    pub fn find(&self, query: &Query) -> Result<Vec<Event>, StoreError> {
        self.observe(Direction::Read, self.queries.find(query))
    }

    pub fn find_by_id(&self, id: &str) -> Result<Event, StoreError> {
        self.observe(Direction::Read, self.queries.find_by_id(id))
    }

    pub fn find_ids(&self, query: &TimeQuery, sink: &mut IdSink<'_>) -> Result<(), StoreError> {
        self.observe(Direction::Read, self.queries.find_ids(query, sink))
    }

    /// Lists live topics from the backend, sorted by name.
    pub fn get_topics(&self) -> Result<Vec<Topic>, StoreError> {
        let result = self
            .backend
            .list_topics()
            .map_err(StoreError::backend("list_topics"))
            .and_then(|raw| raw.into_iter().map(decode_topic).collect::<Result<Vec<_>, _>>());
        let mut topics = self.observe(Direction::Read, result)?;
        topics.sort_by_key(|t| t.name.to_lowercase());
        Ok(topics)
    }

    /// Lists dcs from the backend, sorted by name.
    pub fn get_dcs(&self) -> Result<Vec<Dc>, StoreError> {
        let result = self.backend.list_dcs().map_err(StoreError::backend("list_dcs"));
        let mut dcs = self.observe(Direction::Read, result)?;
        dcs.sort_by_key(|dc| dc.name.to_lowercase());
        Ok(dcs)
    }

    /// Registers a topic and returns its id.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty name or a malformed schema, `Conflict` when
    /// the name is taken in any letter case.
    pub fn add_topic(&self, name: &str, schema: Option<Value>) -> Result<String, StoreError> {
        let result = self.add_topic_inner(name, schema);
        self.observe(Direction::Write, result)
    }

    fn add_topic_inner(&self, name: &str, schema: Option<Value>) -> Result<String, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("topic_name must be provided".to_string()));
        }
        if self.cache.resolve_topic_id(name).is_some() {
            return Err(StoreError::Conflict(format!("topic '{name}' already exists")));
        }
        let schema = compile_schema(schema)?;

        let entry = TopicEntry {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            schema,
        };
        self.backend
            .put_topic(&encode_topic(&entry)?)
            .map_err(StoreError::name_write("put_topic", format!("topic '{name}'")))?;
        if !self.cache.put_topic(entry.clone()) {
            warn!(topic = %name, "topic name claimed concurrently; cache will converge on refresh");
        }
        info!(topic_id = %entry.id, topic = %name, "topic added");
        Ok(entry.id)
    }

    /// Renames a topic and/or replaces its schema. Returns the topic id.
    ///
    /// An empty `new_name` keeps the current name. `None` keeps the current
    /// schema; a supplied schema must be backward compatible with it.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown topic, `Conflict` when `new_name` belongs
    /// to another topic, `Validation` for a malformed schema, and
    /// `SchemaViolation` for an incompatible one.
    pub fn update_topic(
        &self,
        old_name: &str,
        new_name: &str,
        schema: Option<Value>,
    ) -> Result<String, StoreError> {
        let result = self.update_topic_inner(old_name, new_name, schema);
        self.observe(Direction::Write, result)
    }

    fn update_topic_inner(
        &self,
        old_name: &str,
        new_name: &str,
        schema: Option<Value>,
    ) -> Result<String, StoreError> {
        let current = self
            .cache
            .topic_entry(old_name)
            .ok_or_else(|| StoreError::NotFound(format!("topic '{old_name}' does not exist")))?;

        let new_name = match new_name.trim() {
            "" => current.name.clone(),
            name => name.to_string(),
        };
        if self
            .cache
            .resolve_topic_id(&new_name)
            .is_some_and(|owner| owner != current.id)
        {
            return Err(StoreError::Conflict(format!("topic '{new_name}' already exists")));
        }

        let schema_changed = schema.is_some();
        let schema = match schema {
            None => current.schema.clone(),
            Some(document) => {
                let old_document = current
                    .schema
                    .as_ref()
                    .map(|s| s.document.as_ref().clone())
                    .unwrap_or(Value::Null);
                let compiled = compile_schema(Some(document.clone()))?;
                let reasons = incompatibilities(&old_document, &document);
                if !reasons.is_empty() {
                    return Err(StoreError::SchemaViolation(format!(
                        "schema change is not backward compatible: {}",
                        reasons.join("; ")
                    )));
                }
                compiled
            }
        };

        let entry = TopicEntry {
            id: current.id.clone(),
            name: new_name,
            schema,
        };
        self.backend
            .update_topic(&encode_topic(&entry)?)
            .map_err(StoreError::name_write("update_topic", format!("topic '{}'", entry.name)))?;

        let applied = if schema_changed {
            self.cache.put_topic(entry.clone())
        } else {
            self.cache.rename_topic(&entry.id, &entry.name)
        };
        if !applied {
            warn!(topic_id = %entry.id, "topic changed concurrently; cache will converge on refresh");
        }
        info!(topic_id = %entry.id, topic = %entry.name, schema_changed, "topic updated");
        Ok(entry.id)
    }

    /// Soft-deletes a topic. Its events stay readable by id.
    pub fn delete_topic(&self, name: &str) -> Result<(), StoreError> {
        let result = self.delete_topic_inner(name);
        self.observe(Direction::Write, result)
    }

    fn delete_topic_inner(&self, name: &str) -> Result<(), StoreError> {
        let id = self
            .cache
            .resolve_topic_id(name)
            .ok_or_else(|| StoreError::NotFound(format!("topic '{name}' does not exist")))?;
        self.backend
            .delete_topic(&id)
            .map_err(StoreError::backend("delete_topic"))?;
        self.cache.delete_topic(&id);
        info!(topic_id = %id, topic = %name, "topic deleted");
        Ok(())
    }

    /// Registers a datacenter and returns its id.
    pub fn add_dc(&self, name: &str) -> Result<String, StoreError> {
        let result = self.add_dc_inner(name);
        self.observe(Direction::Write, result)
    }

    fn add_dc_inner(&self, name: &str) -> Result<String, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("dc name must be provided".to_string()));
        }
        if self.cache.resolve_dc_id(name).is_some() {
            return Err(StoreError::Conflict(format!("dc '{name}' already exists")));
        }
        let dc = Dc {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
        };
        self.backend
            .put_dc(&dc)
            .map_err(StoreError::name_write("put_dc", format!("dc '{name}'")))?;
        if !self.cache.put_dc(&dc) {
            warn!(dc = %name, "dc name claimed concurrently; cache will converge on refresh");
        }
        info!(dc_id = %dc.id, dc = %name, "dc added");
        Ok(dc.id)
    }

    /// Renames a datacenter and returns its id.
    pub fn update_dc(&self, old_name: &str, new_name: &str) -> Result<String, StoreError> {
        let result = self.update_dc_inner(old_name, new_name);
        self.observe(Direction::Write, result)
    }

    fn update_dc_inner(&self, old_name: &str, new_name: &str) -> Result<String, StoreError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StoreError::Validation("new dc name must be provided".to_string()));
        }
        if old_name == new_name {
            return Err(StoreError::Validation("no changes".to_string()));
        }
        let id = self.cache.resolve_dc_id(old_name);
        if self
            .cache
            .resolve_dc_id(new_name)
            .is_some_and(|owner| Some(&owner) != id.as_ref())
        {
            return Err(StoreError::Conflict(format!("dc '{new_name}' already exists")));
        }
        let id =
            id.ok_or_else(|| StoreError::NotFound(format!("dc '{old_name}' does not exist")))?;

        self.backend
            .update_dc(&id, new_name)
            .map_err(StoreError::name_write("update_dc", format!("dc '{new_name}'")))?;
        if !self.cache.rename_dc(&id, new_name) {
            warn!(dc_id = %id, "dc changed concurrently; cache will converge on refresh");
        }
        info!(dc_id = %id, dc = %new_name, "dc renamed");
        Ok(id)
    }

    /// Rebuilds the cache from the backend.
    pub fn refresh(&self) -> Result<ReconcileStats, StoreError> {
        self.observe(
            Direction::Read,
            reconcile::reconcile(self.backend.as_ref(), &self.cache),
        )
    }

    pub fn close(&self) {
        self.backend.close();
        info!("event store closed");
    }

    pub fn failure_counts(&self) -> FailureCounts {
        FailureCounts {
            read_failures: self.failures.reads.load(Ordering::Relaxed),
            write_failures: self.failures.writes.load(Ordering::Relaxed),
        }
    }

    /// Logs a result by error kind and counts backend failures.
    fn observe<T>(&self, direction: Direction, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(e) = &result {
            match e {
                StoreError::Backend { operation, source } => {
                    let counter = match direction {
                        Direction::Read => &self.failures.reads,
                        Direction::Write => &self.failures.writes,
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    error!(operation = *operation, error = %source, "storage backend call failed");
                }
                StoreError::NotFound(msg) => debug!(reason = %msg, "not found"),
                StoreError::Validation(msg) | StoreError::SchemaViolation(msg) => {
                    debug!(reason = %msg, "request rejected")
                }
                StoreError::Conflict(msg) => info!(reason = %msg, "name conflict"),
            }
        }
        result
    }
}

/// Compiles a caller-supplied schema. Unconstrained documents yield `None`.
fn compile_schema(schema: Option<Value>) -> Result<Option<TopicSchema>, StoreError> {
    match schema {
        None => Ok(None),
        Some(document) => TopicSchema::from_document(document)
            .map_err(|e| StoreError::Validation(format!("invalid data_schema: {e}"))),
    }
}

fn encode_topic(entry: &TopicEntry) -> Result<RawTopic, StoreError> {
    let schema = match &entry.schema {
        Some(schema) => serde_json::to_string(schema.document.as_ref())
            .map_err(|e| StoreError::Validation(format!("invalid data_schema: {e}")))?,
        None => EMPTY_SCHEMA.to_string(),
    };
    Ok(RawTopic {
        id: entry.id.clone(),
        name: entry.name.clone(),
        schema,
    })
}

fn decode_topic(raw: RawTopic) -> Result<Topic, StoreError> {
    let schema = match raw.schema.trim() {
        "" | EMPTY_SCHEMA => None,
        text => Some(serde_json::from_str(text).map_err(|e| StoreError::Backend {
            operation: "list_topics",
            source: evstore_types::BackendError::Corrupt(format!(
                "schema of topic {}: {e}",
                raw.id
            )),
        })?),
    };
    Ok(Topic {
        id: raw.id,
        name: raw.name,
        schema,
    })
}
