//! Full refresh of the metadata cache from the backend.

use evstore_types::{BackendError, StorageBackend};

use crate::cache::{CacheGeneration, MetadataCache, TopicEntry};
use crate::error::StoreError;

/// Counts from one successful reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub topics: usize,
    pub dcs: usize,
}

/// Reads every topic and dc from the backend and builds a new cache
/// generation. Nothing is swapped in.
///
/// # Errors
///
/// Fails when either listing fails or any stored schema no longer parses
/// or compiles. One bad schema fails the whole generation.
pub fn build_generation(backend: &dyn StorageBackend) -> Result<CacheGeneration, StoreError> {
    let raw_topics = backend
        .list_topics()
        .map_err(StoreError::backend("reconcile"))?;
    let dcs = backend.list_dcs().map_err(StoreError::backend("reconcile"))?;

    let mut topics = Vec::with_capacity(raw_topics.len());
    for raw in raw_topics {
        let topic_id = raw.id.clone();
        let entry = TopicEntry::from_raw(raw).map_err(|e| StoreError::Backend {
            operation: "reconcile",
            source: BackendError::Corrupt(format!("schema of topic {topic_id}: {e}")),
        })?;
        topics.push(entry);
    }

    Ok(CacheGeneration { topics, dcs })
}

/// Runs one reconciliation cycle. On failure the cache keeps its previous
/// generation untouched.
///
/// # Errors
///
/// See [`build_generation`].
pub fn reconcile(
    backend: &dyn StorageBackend,
    cache: &MetadataCache,
) -> Result<ReconcileStats, StoreError> {
    let generation = build_generation(backend)?;
    let stats = ReconcileStats {
        topics: generation.topics.len(),
        dcs: generation.dcs.len(),
    };
    cache.replace_all(generation);
    tracing::debug!(topics = stats.topics, dcs = stats.dcs, "metadata cache refreshed");
    Ok(stats)
}
