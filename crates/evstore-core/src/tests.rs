use std::sync::Arc;

use evstore_types::{BackendError, Query, StorageBackend, TimeQuery, UnaddedEvent};
use serde_json::{json, Value};

use crate::testing::MemoryBackend;
use crate::{EventStore, StoreError};

fn store() -> (EventStore, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::default());
    let store = EventStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    (store, backend)
}

fn deploy_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"version": {"type": "string"}},
        "required": ["version"]
    })
}

fn draft(topic: &str, event_time: i64, data: Value) -> UnaddedEvent {
    UnaddedEvent {
        dc: "dc1".to_string(),
        host: "h1".to_string(),
        topic_name: topic.to_string(),
        event_time,
        data: data.as_object().cloned(),
        ..UnaddedEvent::default()
    }
}

fn window(start: i64, end: i64) -> Query {
    Query {
        start_event_time: start,
        end_event_time: end,
        ..Query::default()
    }
}

fn seeded() -> (EventStore, Arc<MemoryBackend>) {
    let (store, backend) = store();
    store.add_dc("dc1").expect("dc should be added");
    store
        .add_topic("deploy", Some(deploy_schema()))
        .expect("topic should be added");
    (store, backend)
}

#[test]
fn deploy_events_are_validated_against_topic_schema() {
    let (store, backend) = seeded();

    let id = store
        .add_event(draft("deploy", 1_700_000_000, json!({"version": "1.2"})))
        .expect("valid event should be stored");

    let found = store
        .find(&Query {
            topic_name: vec!["Deploy".to_string()],
            ..window(1_699_999_999, 1_700_000_001)
        })
        .expect("find should succeed");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].event_id, id);
    assert_eq!(found[0].event_time, 1_700_000_000_000);

    let err = store
        .add_event(draft("deploy", 1_700_000_000, json!({})))
        .expect_err("missing version should be rejected");
    match err {
        StoreError::SchemaViolation(msg) => assert!(msg.contains("version"), "{msg}"),
        other => panic!("expected schema violation, got {other:?}"),
    }
    assert_eq!(backend.events().len(), 1, "rejected event must not be written");
}

#[test]
fn incompatible_schema_update_keeps_current_schema() {
    let (store, _) = seeded();

    let narrowed = json!({
        "type": "object",
        "properties": {
            "version": {"type": "string"},
            "replicas": {"type": "integer"}
        },
        "required": ["version", "replicas"]
    });
    let err = store
        .update_topic("deploy", "", Some(narrowed))
        .expect_err("newly required field should be incompatible");
    assert!(matches!(err, StoreError::SchemaViolation(_)), "{err:?}");

    store
        .add_event(draft("deploy", 1_700_000_000, json!({"version": "2"})))
        .expect("old schema should still govern the topic");
}

#[test]
fn compatible_schema_update_applies_and_defaults_backfill_on_read() {
    let (store, _) = seeded();
    let id = store
        .add_event(draft("deploy", 1_700_000_000, json!({"version": "1"})))
        .expect("event should be stored");

    let widened = json!({
        "type": "object",
        "properties": {
            "version": {"type": "string"},
            "env": {"type": "string", "default": "prod"}
        },
        "required": ["version"]
    });
    store
        .update_topic("deploy", "", Some(widened))
        .expect("adding an optional field is compatible");

    let event = store.find_by_id(&id).expect("event should be found");
    assert_eq!(event.data["env"], json!("prod"));
    assert_eq!(event.data["version"], json!("1"));
}

#[test]
fn schema_keywords_the_store_cannot_enforce_are_refused() {
    let (store, _) = seeded();

    let err = store
        .add_topic(
            "release",
            Some(json!({
                "properties": {"version": {"type": "string", "pattern": "^[0-9]+\\.[0-9]+$"}}
            })),
        )
        .expect_err("pattern cannot be enforced");
    assert!(matches!(err, StoreError::Validation(ref m) if m.contains("pattern")), "{err:?}");
    assert!(store.cache().resolve_topic_id("release").is_none());
}

#[test]
fn any_of_contract_is_enforced_on_ingest() {
    let (store, _) = seeded();
    store
        .add_topic(
            "either",
            Some(json!({"anyOf": [{"required": ["a"]}, {"required": ["b"]}]})),
        )
        .expect("anyOf is supported");

    let err = store
        .add_event(draft("either", 1_700_000_000, json!({})))
        .expect_err("neither branch matches");
    assert!(matches!(err, StoreError::SchemaViolation(_)), "{err:?}");
    store
        .add_event(draft("either", 1_700_000_000, json!({"b": true})))
        .expect("second branch matches");
}

#[test]
fn narrowing_items_or_enum_is_rejected_and_old_data_still_validates() {
    let (store, _) = store();
    store.add_dc("dc1").expect("dc");
    let original = json!({
        "properties": {
            "hosts": {"type": "array", "items": {"type": "string"}},
            "env": {"type": "string", "enum": ["prod", "staging"]}
        }
    });
    store.add_topic("rollout", Some(original)).expect("topic");
    let data = json!({"hosts": ["web-1"], "env": "staging"});
    store
        .add_event(draft("rollout", 1_700_000_000, data.clone()))
        .expect("accepted under the original schema");

    let narrowed = json!({
        "properties": {
            "hosts": {"type": "array", "items": {"type": "integer"}},
            "env": {"type": "string", "enum": ["prod"], "maxLength": 2}
        }
    });
    let err = store
        .update_topic("rollout", "", Some(narrowed))
        .expect_err("narrowing must be refused");
    match err {
        StoreError::SchemaViolation(msg) => {
            assert!(msg.contains("hosts[]: type was narrowed"), "{msg}");
            assert!(msg.contains("env: enum"), "{msg}");
            assert!(msg.contains("env: maxLength"), "{msg}");
        }
        other => panic!("expected schema violation, got {other:?}"),
    }

    store
        .add_event(draft("rollout", 1_700_000_001, data))
        .expect("the same data must still be accepted");
}

#[test]
fn rename_without_schema_keeps_schema() {
    let (store, _) = seeded();
    let id = store.cache().resolve_topic_id("deploy").expect("topic cached");

    let renamed = store
        .update_topic("deploy", "release", None)
        .expect("rename should succeed");
    assert_eq!(renamed, id);

    assert!(store.cache().resolve_topic_id("deploy").is_none());
    assert!(matches!(
        store.add_event(draft("release", 0, json!({}))),
        Err(StoreError::SchemaViolation(_))
    ));
    assert!(store.cache().topic_schema(&id).is_some());
}

#[test]
fn topic_name_conflicts_ignore_case() {
    let (store, _) = seeded();
    store.add_topic("other", None).expect("second topic");

    assert!(matches!(store.add_topic("DEPLOY", None), Err(StoreError::Conflict(_))));
    assert!(matches!(
        store.update_topic("other", "Deploy", None),
        Err(StoreError::Conflict(_))
    ));
    assert!(matches!(
        store.update_topic("missing", "x", None),
        Err(StoreError::NotFound(_))
    ));
    store
        .update_topic("deploy", "DEPLOY", None)
        .expect("case-only rename of the same topic is allowed");
}

#[test]
fn malformed_schema_is_a_validation_error() {
    let (store, _) = store();
    assert!(matches!(
        store.add_topic("bad", Some(json!({"required": "version"}))),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(store.add_topic("  ", None), Err(StoreError::Validation(_))));
}

#[test]
fn deleted_topic_disappears_everywhere_at_once() {
    let (store, backend) = seeded();
    let topic_id = store.cache().resolve_topic_id("deploy").expect("topic cached");
    let id = store
        .add_event(draft("deploy", 1_700_000_000, json!({"version": "1"})))
        .expect("event stored");

    store.delete_topic("deploy").expect("delete should succeed");

    let cache = store.cache();
    assert!(cache.resolve_topic_id("deploy").is_none());
    assert!(cache.topic_name(&topic_id).is_none());
    assert!(cache.topic_schema(&topic_id).is_none());
    assert!(cache.topic_schema_properties(&topic_id).is_none());

    assert!(matches!(
        store.add_event(draft("deploy", 0, json!({"version": "1"}))),
        Err(StoreError::NotFound(_))
    ));
    assert!(store.find_by_id(&id).is_ok(), "events of deleted topics stay readable by id");
    assert!(store
        .find(&window(1_699_999_999, 1_700_000_001))
        .expect("find")
        .is_empty());
    assert!(store.get_topics().expect("topics").is_empty());
    let mut streamed = Vec::new();
    store
        .find_ids(
            &TimeQuery {
                start_event_time: 1_699_999_999,
                end_event_time: 1_700_000_001,
                ..TimeQuery::default()
            },
            &mut |id| {
                streamed.push(id);
                Ok(())
            },
        )
        .expect("find_ids");
    assert!(streamed.is_empty(), "id streams skip deleted topics: {streamed:?}");
    assert!(matches!(store.delete_topic("deploy"), Err(StoreError::NotFound(_))));

    store.add_topic("deploy", None).expect("name is free again");
    assert_eq!(backend.events().len(), 1);
}

#[test]
fn query_requires_an_ordered_time_range() {
    let (store, _) = seeded();
    for query in [window(0, 10), window(10, 0), window(20, 10)] {
        assert!(matches!(store.find(&query), Err(StoreError::Validation(_))));
    }

    let mut sink = |_: String| Ok::<(), BackendError>(());
    assert!(matches!(
        store.find_ids(
            &TimeQuery {
                start_event_time: 5,
                end_event_time: 1,
                ..TimeQuery::default()
            },
            &mut sink,
        ),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn results_are_newest_first_with_id_tiebreak() {
    let (store, _) = seeded();
    store.add_topic("free", None).expect("topic");

    let mut ids = Vec::new();
    for t in [1_700_000_010, 1_700_000_030, 1_700_000_020, 1_700_000_030] {
        ids.push(store.add_event(draft("free", t, json!({}))).expect("stored"));
    }

    let found = store.find(&window(1_700_000_000, 1_700_000_100)).expect("find");
    let times: Vec<i64> = found.iter().map(|e| e.event_time).collect();
    assert_eq!(
        times,
        vec![1_700_000_030_000, 1_700_000_030_000, 1_700_000_020_000, 1_700_000_010_000]
    );
    assert!(found[0].event_id > found[1].event_id);
    assert!(found[1..].iter().all(|e| ids.contains(&e.event_id)));
}

#[test]
fn unresolved_topic_filter_matches_nothing() {
    let (store, _) = seeded();
    store
        .add_event(draft("deploy", 1_700_000_000, json!({"version": "1"})))
        .expect("stored");

    let query = Query {
        topic_name: vec!["nope".to_string()],
        ..window(1_699_999_000, 1_700_001_000)
    };
    assert!(store.find(&query).expect("find").is_empty());

    let query = Query {
        dc: vec!["elsewhere".to_string()],
        ..window(1_699_999_000, 1_700_001_000)
    };
    assert!(store.find(&query).expect("find").is_empty());

    let query = Query {
        topic_name: vec!["nope".to_string(), "deploy".to_string()],
        ..window(1_699_999_000, 1_700_001_000)
    };
    assert_eq!(store.find(&query).expect("find").len(), 1);
}

#[test]
fn query_bounds_are_seconds() {
    let (store, _) = seeded();
    store
        .add_event(draft("deploy", 1_700_000_000, json!({"version": "1"})))
        .expect("stored");

    assert_eq!(store.find(&window(1_700_000_000, 1_700_000_000)).expect("find").len(), 1);
    assert!(store.find(&window(1_700_000_001, 1_700_000_005)).expect("find").is_empty());
}

#[test]
fn find_ids_defaults_limit_and_stops_on_closed_sink() {
    let (store, _) = seeded();
    store.add_topic("free", None).expect("topic");
    for i in 0..250 {
        store
            .add_event(draft("free", 1_700_000_000 + i, json!({})))
            .expect("stored");
    }

    let mut ids = Vec::new();
    let mut sink = |id: String| {
        ids.push(id);
        Ok::<(), BackendError>(())
    };
    store
        .find_ids(
            &TimeQuery {
                start_event_time: 1_700_000_000,
                end_event_time: 1_700_001_000,
                ascending: true,
                ..TimeQuery::default()
            },
            &mut sink,
        )
        .expect("stream");
    assert_eq!(ids.len(), 200);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let mut closed = |_: String| Err(BackendError::SinkClosed);
    let err = store
        .find_ids(
            &TimeQuery {
                start_event_time: 1_700_000_000,
                end_event_time: 1_700_001_000,
                ..TimeQuery::default()
            },
            &mut closed,
        )
        .expect_err("closed sink should end the stream");
    assert!(err.is_backend());
}

#[test]
fn only_backend_failures_are_counted() {
    let (store, backend) = seeded();

    let _ = store.add_event(draft("missing", 0, json!({})));
    let _ = store.find(&window(0, 0));
    assert_eq!(store.failure_counts().write_failures, 0);
    assert_eq!(store.failure_counts().read_failures, 0);

    backend.set_failing(true);
    let err = store
        .add_event(draft("deploy", 0, json!({"version": "1"})))
        .expect_err("backend is down");
    assert!(err.is_backend());
    let _ = store.find(&window(1, 2));
    let _ = store.get_dcs();

    let counts = store.failure_counts();
    assert_eq!(counts.write_failures, 1);
    assert_eq!(counts.read_failures, 2);
}

#[test]
fn names_claimed_by_another_instance_are_conflicts() {
    let backend = Arc::new(MemoryBackend::default());
    let first = EventStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    let second = EventStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);

    first.add_topic("deploy", None).expect("topic");
    first.add_dc("east").expect("dc");
    second.add_topic("release", None).expect("topic");
    second.add_dc("west").expect("dc");

    let err = second.add_topic("Deploy", None).expect_err("name taken elsewhere");
    assert!(matches!(err, StoreError::Conflict(ref m) if m.contains("Deploy")), "{err:?}");
    let err = second.update_topic("release", "DEPLOY", None).expect_err("rename onto taken name");
    assert!(matches!(err, StoreError::Conflict(_)), "{err:?}");
    assert!(matches!(second.add_dc("EAST"), Err(StoreError::Conflict(_))));
    assert!(matches!(second.update_dc("west", "East"), Err(StoreError::Conflict(_))));

    assert_eq!(second.failure_counts().write_failures, 0);
    assert!(second.cache().resolve_topic_id("deploy").is_none());
    assert!(second.cache().resolve_topic_id("release").is_some());
}

#[test]
fn refresh_picks_up_changes_from_other_writers() {
    let backend = Arc::new(MemoryBackend::default());
    let writer = EventStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);
    let reader = EventStore::new(Arc::clone(&backend) as Arc<dyn StorageBackend>);

    writer.add_dc("dc1").expect("dc");
    writer.add_topic("deploy", Some(deploy_schema())).expect("topic");
    assert!(reader.cache().resolve_topic_id("deploy").is_none());

    let stats = reader.refresh().expect("refresh");
    assert_eq!((stats.topics, stats.dcs), (1, 1));
    assert!(matches!(
        reader.add_event(draft("deploy", 0, json!({}))),
        Err(StoreError::SchemaViolation(_))
    ));
}

#[test]
fn failed_refresh_keeps_previous_generation() {
    let (store, backend) = seeded();
    let topic_id = store.cache().resolve_topic_id("deploy").expect("topic cached");
    store.add_topic("later", None).expect("topic");

    backend.corrupt_schema(&topic_id, "{not json");
    let err = store.refresh().expect_err("corrupt schema should fail the cycle");
    assert!(err.is_backend());

    assert_eq!(store.cache().topic_count(), 2);
    assert!(store.cache().topic_schema(&topic_id).is_some());
}

#[test]
fn dc_rules() {
    let (store, _) = store();
    let id = store.add_dc("Dc1").expect("dc");

    assert!(matches!(store.add_dc("DC1"), Err(StoreError::Conflict(_))));
    assert!(matches!(store.add_dc(""), Err(StoreError::Validation(_))));
    assert!(matches!(store.update_dc("Dc1", "Dc1"), Err(StoreError::Validation(_))));
    assert!(matches!(store.update_dc("Dc1", ""), Err(StoreError::Validation(_))));
    assert!(matches!(store.update_dc("nope", "x"), Err(StoreError::NotFound(_))));

    store.add_dc("dc2").expect("second dc");
    assert!(matches!(store.update_dc("Dc1", "DC2"), Err(StoreError::Conflict(_))));

    assert_eq!(store.update_dc("dc1", "east").expect("rename"), id);
    let names: Vec<String> = store.get_dcs().expect("dcs").into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["dc2", "east"]);
}

#[test]
fn get_topics_returns_parsed_schemas_sorted() {
    let (store, _) = seeded();
    store.add_topic("alpha", None).expect("topic");

    let topics = store.get_topics().expect("topics");
    let names: Vec<&str> = topics.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "deploy"]);
    assert!(topics[0].schema.is_none());
    assert_eq!(topics[1].schema, Some(deploy_schema()));
}

#[test]
fn close_releases_the_backend() {
    let (store, backend) = seeded();
    store.close();
    assert!(backend.closed.load(std::sync::atomic::Ordering::SeqCst));
}
