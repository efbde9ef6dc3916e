//! Periodic reconciliation of the metadata cache.

use std::sync::Arc;

use evstore_core::EventStore;
use tokio::time::{sleep, Duration};

/// Starts the cache refresh loop.
///
/// Runs indefinitely. Each cycle rebuilds the cache from the database; a
/// failed cycle leaves the previous cache in place and is retried on the
/// next tick.
pub async fn start_reconcile_task(store: Arc<EventStore>, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("metadata refresh task disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting metadata refresh task");

    loop {
        sleep(interval).await;

        let store = Arc::clone(&store);
        let result = tokio::task::spawn_blocking(move || store.refresh()).await;

        match result {
            Ok(Ok(stats)) => {
                tracing::debug!(topics = stats.topics, dcs = stats.dcs, "metadata refreshed");
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "metadata refresh failed; keeping previous cache");
            }
            Err(e) => {
                tracing::error!(error = %e, "metadata refresh task panicked or was cancelled");
            }
        }
    }
}
