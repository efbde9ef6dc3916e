use std::sync::Arc;
use std::time::Duration;

use evstore_core::EventStore;
use evstore_db::{DbRuntimeSettings, SqliteBackend};
use evstore_server::background::start_reconcile_task;

fn open_store(path: &str) -> Arc<EventStore> {
    let backend = SqliteBackend::open(path, DbRuntimeSettings::default()).expect("open");
    let store = Arc::new(EventStore::new(Arc::new(backend)));
    store.refresh().expect("initial refresh");
    store
}

#[tokio::test]
async fn refresh_loop_picks_up_topics_written_elsewhere() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let path = path.to_str().unwrap();

    let serving = open_store(path);
    let admin = open_store(path);

    let task = tokio::spawn(start_reconcile_task(Arc::clone(&serving), 1));

    admin.add_topic("deploy", None).expect("topic");
    assert!(serving.cache().resolve_topic_id("deploy").is_none());

    let seen = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if serving.cache().resolve_topic_id("deploy").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    task.abort();

    assert!(seen.is_ok(), "refresh loop should load the new topic");
}

#[tokio::test]
async fn zero_interval_disables_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let store = open_store(path.to_str().unwrap());

    tokio::time::timeout(Duration::from_secs(1), start_reconcile_task(store, 0))
        .await
        .expect("disabled task should return immediately");
}
