use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use evstore_core::EventStore;
use evstore_db::{DbRuntimeSettings, SqliteBackend};
use evstore_server::{app, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt; // for oneshot

struct TestApp {
    router: Router,
    _dir: TempDir,
}

fn setup() -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("events.db");
    let backend = SqliteBackend::open(path.to_str().unwrap(), DbRuntimeSettings::default())
        .expect("backend should open");
    let store = Arc::new(EventStore::new(Arc::new(backend)));
    store.refresh().expect("initial refresh");
    TestApp {
        router: app(AppState::new(store)),
        _dir: dir,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn send_json(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed(app: &TestApp) {
    let (status, _) = send_json(app, "POST", "/v1/dc", Some(json!({"dc_name": "dc1"}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(
        app,
        "POST",
        "/v1/topic",
        Some(json!({
            "topic_name": "deploy",
            "data_schema": {
                "type": "object",
                "properties": {"version": {"type": "string"}},
                "required": ["version"]
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

fn deploy_event(event_time: i64, data: Value) -> Value {
    json!({
        "dc": "DC1",
        "host": "h1",
        "topic_name": "Deploy",
        "event_time": event_time,
        "tag_set": ["release"],
        "data": data
    })
}

#[tokio::test]
async fn add_then_find_event() {
    let app = setup();
    seed(&app).await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/event",
        Some(deploy_event(1_700_000_000, json!({"version": "1.2"}))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let event_id = body["event_id"].as_str().unwrap().to_string();

    let (status, body) = send_json(
        &app,
        "GET",
        "/v1/event?topic_name=deploy&start_event_time=1699999999&end_event_time=1700000001",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["event_id"], json!(event_id));
    assert_eq!(results[0]["event_time"], json!(1_700_000_000_000i64));
    assert_eq!(results[0]["tag_set"], json!(["release"]));

    let (status, body) = send_json(&app, "GET", &format!("/v1/event/{event_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["version"], json!("1.2"));
}

#[tokio::test]
async fn schema_violation_is_422_and_nothing_is_stored() {
    let app = setup();
    seed(&app).await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/event",
        Some(deploy_event(1_700_000_000, json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("version"));

    let (_, body) = send_json(
        &app,
        "GET",
        "/v1/event?start_event_time=1&end_event_time=2000000000",
        None,
    )
    .await;
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn missing_fields_and_bad_ranges_are_400() {
    let app = setup();
    seed(&app).await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/v1/event",
        Some(json!({"dc": "dc1", "topic_name": "deploy"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("event missing host"));

    let (status, _) = send_json(
        &app,
        "GET",
        "/v1/event?start_event_time=20&end_event_time=10",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, "GET", "/v1/event_ids?start_event_time=5", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "POST", "/v1/event", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_names_are_404() {
    let app = setup();
    seed(&app).await;

    let mut event = deploy_event(0, json!({"version": "1"}));
    event["topic_name"] = json!("missing");
    let (status, _) = send_json(&app, "POST", "/v1/event", Some(event)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(&app, "GET", "/v1/event/01ARZ3NDEKTSV4RRFFQ69G5FAV", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn event_ids_stream_as_lines() {
    let app = setup();
    seed(&app).await;

    let mut expected = Vec::new();
    for t in [1_700_000_001, 1_700_000_002, 1_700_000_003] {
        let (_, body) = send_json(
            &app,
            "POST",
            "/v1/event",
            Some(deploy_event(t, json!({"version": "1"}))),
        )
        .await;
        expected.push(body["event_id"].as_str().unwrap().to_string());
    }

    let (status, bytes) = send(
        &app,
        "GET",
        "/v1/event_ids?start_event_time=1700000000&end_event_time=1700000010&ascending=true&limit=2",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    let ids: Vec<&str> = text.lines().collect();
    assert_eq!(ids, vec![expected[0].as_str(), expected[1].as_str()]);
}

#[tokio::test]
async fn health_reports_cache_sizes() {
    let app = setup();
    seed(&app).await;

    let (status, body) = send_json(&app, "GET", "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["topics"], json!(1));
    assert_eq!(body["dcs"], json!(1));
    assert_eq!(body["failures"]["write_failures"], json!(0));
}
