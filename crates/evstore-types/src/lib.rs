//! Shared types for the evstore event store.
//!
//! This crate holds the records every other crate exchanges: stored events,
//! client drafts, topics, datacenters, query shapes, and the
//! [`StorageBackend`] contract the core calls into. It depends on nothing
//! inside the workspace so the dependency graph stays acyclic.
//!
//! Wire names follow the JSON field names clients already use
//! (`tag_set`, `target_host_set`, `data_schema`, ...).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod backend;
mod query;

pub use backend::{BackendError, IdSink, StorageBackend};
pub use query::{IdFilter, Query, TimeQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// A free-form JSON object carried in an event's `data` field.
pub type EventData = Map<String, Value>;

/// A fully resolved, immutable stored event.
///
/// `event_time` and `received_time` are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Globally unique, time-ordered identifier.
    pub event_id: String,
    /// Optional back-reference to another event. Not checked for existence.
    #[serde(default)]
    pub parent_event_id: String,
    /// When the event happened, in milliseconds.
    pub event_time: i64,
    /// Datacenter id resolved at ingestion.
    pub dc_id: String,
    /// Topic id resolved at ingestion.
    pub topic_id: String,
    #[serde(rename = "tag_set", default)]
    pub tags: Vec<String>,
    pub host: String,
    #[serde(rename = "target_host_set", default)]
    pub target_hosts: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub data: EventData,
    /// Server wall clock at ingestion, in milliseconds.
    pub received_time: i64,
}

/// A client-submitted event before augmentation.
///
/// Only `dc`, `host`, and `topic_name` are required. `event_time` is in
/// seconds; zero means "now".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnaddedEvent {
    #[serde(default)]
    pub parent_event_id: String,
    #[serde(default)]
    pub event_time: i64,
    #[serde(default)]
    pub dc: String,
    #[serde(default)]
    pub topic_name: String,
    #[serde(rename = "tag_set", default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub host: String,
    #[serde(rename = "target_host_set", default)]
    pub target_hosts: Vec<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub data: Option<EventData>,
}

/// A topic as returned to callers, with its schema parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(rename = "topic_id", default)]
    pub id: String,
    #[serde(rename = "topic_name")]
    pub name: String,
    /// JSON-Schema document governing `data`. `None` means no constraint.
    #[serde(rename = "data_schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// A topic in its persisted form.
///
/// `schema` is a serialized JSON document; `"{}"` means no constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTopic {
    pub id: String,
    pub name: String,
    pub schema: String,
}

/// The serialized form of "no schema".
pub const EMPTY_SCHEMA: &str = "{}";

/// A datacenter: the origin namespace attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dc {
    #[serde(rename = "dc_id", default)]
    pub id: String,
    #[serde(rename = "dc_name")]
    pub name: String,
}
