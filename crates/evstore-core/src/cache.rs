//! In-memory mirror of the topic and datacenter tables.
//!
//! The cache keeps four topic tables (name→id, id→name, id→compiled schema,
//! id→schema document) and two dc tables (name→id, id→name). Each domain
//! sits behind its own `RwLock`, so a topic mutation never blocks a dc
//! lookup. Every mutation updates all tables of its domain under one write
//! guard; readers see either the state before or the state after.
//!
//! Names are case-folded for lookup and stored in their original case.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use evstore_schema::{compile, is_unconstrained, CompiledSchema, SchemaError};
use evstore_types::{Dc, RawTopic};
use serde_json::Value;

/// A topic's schema in both compiled and document form.
#[derive(Debug, Clone)]
pub struct TopicSchema {
    pub compiled: Arc<CompiledSchema>,
    pub document: Arc<Value>,
}

impl TopicSchema {
    /// Compiles a schema document. Returns `None` for documents that impose
    /// no constraint.
    ///
    /// # Errors
    ///
    /// Returns the compile error for malformed documents.
    pub fn from_document(document: Value) -> Result<Option<Self>, SchemaError> {
        if is_unconstrained(&document) {
            return Ok(None);
        }
        let compiled = compile(&document)?;
        Ok(Some(Self {
            compiled: Arc::new(compiled),
            document: Arc::new(document),
        }))
    }
}

/// Everything the cache knows about one topic.
#[derive(Debug, Clone)]
pub struct TopicEntry {
    pub id: String,
    pub name: String,
    pub schema: Option<TopicSchema>,
}

impl TopicEntry {
    /// Builds an entry from its persisted form, recompiling the schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the stored schema does not parse or compile.
    pub fn from_raw(raw: RawTopic) -> Result<Self, SchemaError> {
        let document = if raw.schema.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw.schema).map_err(|e| SchemaError::Parse(e.to_string()))?
        };
        Ok(Self {
            id: raw.id,
            name: raw.name,
            schema: TopicSchema::from_document(document)?,
        })
    }
}

#[derive(Debug, Default)]
struct TopicTables {
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
    schemas: HashMap<String, Arc<CompiledSchema>>,
    documents: HashMap<String, Arc<Value>>,
}

impl TopicTables {
    fn insert(&mut self, entry: TopicEntry) {
        self.name_to_id.insert(fold(&entry.name), entry.id.clone());
        match entry.schema {
            Some(schema) => {
                self.schemas.insert(entry.id.clone(), schema.compiled);
                self.documents.insert(entry.id.clone(), schema.document);
            }
            None => {
                self.schemas.remove(&entry.id);
                self.documents.remove(&entry.id);
            }
        }
        self.id_to_name.insert(entry.id, entry.name);
    }

    fn name_taken_by_other(&self, name: &str, id: &str) -> bool {
        self.name_to_id
            .get(&fold(name))
            .is_some_and(|owner| owner != id)
    }

    fn unlink_name(&mut self, id: &str) {
        if let Some(old_name) = self.id_to_name.remove(id) {
            let key = fold(&old_name);
            if self.name_to_id.get(&key).is_some_and(|owner| owner == id) {
                self.name_to_id.remove(&key);
            }
        }
    }
}

#[derive(Debug, Default)]
struct DcTables {
    name_to_id: HashMap<String, String>,
    id_to_name: HashMap<String, String>,
}

impl DcTables {
    fn insert(&mut self, dc: Dc) {
        self.name_to_id.insert(fold(&dc.name), dc.id.clone());
        self.id_to_name.insert(dc.id, dc.name);
    }

    fn name_taken_by_other(&self, name: &str, id: &str) -> bool {
        self.name_to_id
            .get(&fold(name))
            .is_some_and(|owner| owner != id)
    }

    fn unlink_name(&mut self, id: &str) {
        if let Some(old_name) = self.id_to_name.remove(id) {
            let key = fold(&old_name);
            if self.name_to_id.get(&key).is_some_and(|owner| owner == id) {
                self.name_to_id.remove(&key);
            }
        }
    }
}

/// A complete set of cache contents, built off-lock and swapped in whole.
#[derive(Debug, Default)]
pub struct CacheGeneration {
    pub topics: Vec<TopicEntry>,
    pub dcs: Vec<Dc>,
}

/// Concurrency-safe topic and datacenter lookup tables.
#[derive(Debug, Default)]
pub struct MetadataCache {
    topics: RwLock<TopicTables>,
    dcs: RwLock<DcTables>,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve_topic_id(&self, name: &str) -> Option<String> {
        read(&self.topics).name_to_id.get(&fold(name)).cloned()
    }

    pub fn topic_name(&self, id: &str) -> Option<String> {
        read(&self.topics).id_to_name.get(id).cloned()
    }

    pub fn topic_schema(&self, id: &str) -> Option<Arc<CompiledSchema>> {
        read(&self.topics).schemas.get(id).cloned()
    }

    pub fn topic_schema_properties(&self, id: &str) -> Option<Arc<Value>> {
        read(&self.topics).documents.get(id).cloned()
    }

    /// Looks up every table for one topic name under a single read guard.
    pub fn topic_entry(&self, name: &str) -> Option<TopicEntry> {
        let tables = read(&self.topics);
        let id = tables.name_to_id.get(&fold(name))?;
        let schema = match (tables.schemas.get(id), tables.documents.get(id)) {
            (Some(compiled), Some(document)) => Some(TopicSchema {
                compiled: Arc::clone(compiled),
                document: Arc::clone(document),
            }),
            _ => None,
        };
        Some(TopicEntry {
            id: id.clone(),
            name: tables.id_to_name.get(id).cloned().unwrap_or_default(),
            schema,
        })
    }

    pub fn topic_count(&self) -> usize {
        read(&self.topics).id_to_name.len()
    }

    pub fn resolve_dc_id(&self, name: &str) -> Option<String> {
        read(&self.dcs).name_to_id.get(&fold(name)).cloned()
    }

    pub fn dc_name(&self, id: &str) -> Option<String> {
        read(&self.dcs).id_to_name.get(id).cloned()
    }

    pub fn dc_count(&self) -> usize {
        read(&self.dcs).id_to_name.len()
    }

    /// Inserts or replaces a topic, including its schema.
    ///
    /// Returns `false` without touching the tables when the name already
    /// belongs to a different topic.
    pub fn put_topic(&self, entry: TopicEntry) -> bool {
        let mut tables = write(&self.topics);
        if tables.name_taken_by_other(&entry.name, &entry.id) {
            return false;
        }
        tables.unlink_name(&entry.id);
        tables.insert(entry);
        true
    }

    /// Renames a topic, keeping its schema.
    ///
    /// Returns `false` when the id is unknown or the name belongs to a
    /// different topic.
    pub fn rename_topic(&self, id: &str, new_name: &str) -> bool {
        let mut tables = write(&self.topics);
        if !tables.id_to_name.contains_key(id) || tables.name_taken_by_other(new_name, id) {
            return false;
        }
        tables.unlink_name(id);
        tables.name_to_id.insert(fold(new_name), id.to_string());
        tables.id_to_name.insert(id.to_string(), new_name.to_string());
        true
    }

    /// Removes a topic from all four tables. Returns `false` if unknown.
    pub fn delete_topic(&self, id: &str) -> bool {
        let mut tables = write(&self.topics);
        if !tables.id_to_name.contains_key(id) {
            return false;
        }
        tables.unlink_name(id);
        tables.schemas.remove(id);
        tables.documents.remove(id);
        true
    }

    /// Inserts or renames a datacenter. Returns `false` when the name
    /// belongs to a different dc.
    pub fn put_dc(&self, dc: &Dc) -> bool {
        let mut tables = write(&self.dcs);
        if tables.name_taken_by_other(&dc.name, &dc.id) {
            return false;
        }
        tables.unlink_name(&dc.id);
        tables.insert(dc.clone());
        true
    }

    /// Renames a datacenter. Returns `false` when the id is unknown or the
    /// name belongs to a different dc.
    pub fn rename_dc(&self, id: &str, new_name: &str) -> bool {
        let mut tables = write(&self.dcs);
        if !tables.id_to_name.contains_key(id) || tables.name_taken_by_other(new_name, id) {
            return false;
        }
        tables.unlink_name(id);
        tables.insert(Dc {
            id: id.to_string(),
            name: new_name.to_string(),
        });
        true
    }

    /// Replaces the entire contents of both domains.
    ///
    /// The new tables are built before any lock is taken. Both write guards
    /// are then held for the swap (topics first, then dcs), so readers see
    /// either the previous generation or this one.
    pub fn replace_all(&self, generation: CacheGeneration) {
        let mut topic_tables = TopicTables::default();
        for entry in generation.topics {
            topic_tables.insert(entry);
        }

        let mut dc_tables = DcTables::default();
        for dc in generation.dcs {
            dc_tables.insert(dc);
        }

        let mut topics = write(&self.topics);
        let mut dcs = write(&self.dcs);
        *topics = topic_tables;
        *dcs = dc_tables;
    }
}
