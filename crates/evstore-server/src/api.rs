//! HTTP handlers for events, topics, and datacenters.
//!
//! Every store call blocks on SQLite, so handlers hop onto the blocking
//! pool with [`run_blocking`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Extension, Json, Path, Query},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use evstore_core::{validate_range, EventStore, FailureCounts, StoreError};
use evstore_types::{BackendError, Dc, Event, Query as EventQuery, TimeQuery, Topic, UnaddedEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::AppState;

/// Buffered ids between the database scan and the response body.
const ID_STREAM_CAPACITY: usize = 256;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("schema violation: {0}")]
    Unprocessable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => ApiError::BadRequest(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            StoreError::SchemaViolation(msg) => ApiError::Unprocessable(msg),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            backend @ StoreError::Backend { .. } => ApiError::InternalServerError(backend.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Runs a store call on the blocking pool.
async fn run_blocking<T, F>(state: &AppState, call: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&EventStore) -> Result<T, StoreError> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || call(&store))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "blocking store task failed");
            ApiError::InternalServerError("task join error".to_string())
        })?
        .map_err(ApiError::from)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventIdResponse {
    pub event_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Results<T> {
    pub results: Vec<T>,
}

/// Body of `POST /v1/topic` and `PUT /v1/topic/{name}`.
#[derive(Debug, Default, Deserialize)]
pub struct TopicRequest {
    #[serde(default)]
    pub topic_name: String,
    #[serde(default)]
    pub data_schema: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TopicIdResponse {
    pub topic_id: String,
}

/// Body of `POST /v1/dc` and `PUT /v1/dc/{name}`.
#[derive(Debug, Default, Deserialize)]
pub struct DcRequest {
    #[serde(default)]
    pub dc_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DcIdResponse {
    pub dc_id: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub topics: usize,
    pub dcs: usize,
    pub failures: FailureCounts,
}

/// Handler for `POST /v1/event`.
pub async fn add_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<UnaddedEvent>, JsonRejection>,
) -> Result<Json<EventIdResponse>, ApiError> {
    let Json(draft) = payload?;
    let event_id = run_blocking(&state, move |store| store.add_event(draft)).await?;
    Ok(Json(EventIdResponse { event_id }))
}

/// Handler for `GET /v1/event`. List filters take repeated keys
/// (`?topic_name=a&topic_name=b`).
pub async fn find_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Results<Event>>, ApiError> {
    let query = parse_event_query(pairs)?;
    let results = run_blocking(&state, move |store| store.find(&query)).await?;
    Ok(Json(Results { results }))
}

/// Handler for `GET /v1/event/{id}`.
pub async fn get_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> Result<Json<Event>, ApiError> {
    let event = run_blocking(&state, move |store| store.find_by_id(&event_id)).await?;
    Ok(Json(event))
}

/// Handler for `GET /v1/event_ids`.
///
/// Streams one id per line. The range is checked before the response
/// starts; a backend failure after that ends the stream early and is only
/// logged.
pub async fn stream_event_ids_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let query = parse_time_query(pairs)?;
    validate_range(query.start_event_time, query.end_event_time)?;

    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(ID_STREAM_CAPACITY);
    let store = Arc::clone(&state.store);
    tokio::task::spawn_blocking(move || {
        let mut sink = |id: String| {
            tx.blocking_send(Ok(format!("{id}\n")))
                .map_err(|_| BackendError::SinkClosed)
        };
        match store.find_ids(&query, &mut sink) {
            Ok(()) => {}
            Err(StoreError::Backend {
                source: BackendError::SinkClosed,
                ..
            }) => tracing::debug!("event id stream closed by client"),
            Err(e) => tracing::warn!(error = %e, "event id stream ended early"),
        }
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// Handler for `POST /v1/topic`.
pub async fn add_topic_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<TopicRequest>, JsonRejection>,
) -> Result<Json<TopicIdResponse>, ApiError> {
    let Json(request) = payload?;
    let topic_id = run_blocking(&state, move |store| {
        store.add_topic(&request.topic_name, request.data_schema)
    })
    .await?;
    Ok(Json(TopicIdResponse { topic_id }))
}

/// Handler for `PUT /v1/topic/{name}`. An empty `topic_name` keeps the
/// current name; an absent `data_schema` keeps the current schema.
pub async fn update_topic_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<TopicRequest>, JsonRejection>,
) -> Result<Json<TopicIdResponse>, ApiError> {
    let Json(request) = payload?;
    let topic_id = run_blocking(&state, move |store| {
        store.update_topic(&name, &request.topic_name, request.data_schema)
    })
    .await?;
    Ok(Json(TopicIdResponse { topic_id }))
}

/// Handler for `GET /v1/topic`.
pub async fn list_topics_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Results<Topic>>, ApiError> {
    let results = run_blocking(&state, |store| store.get_topics()).await?;
    Ok(Json(Results { results }))
}

/// Handler for `DELETE /v1/topic/{name}`.
pub async fn delete_topic_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    run_blocking(&state, move |store| store.delete_topic(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for `POST /v1/dc`.
pub async fn add_dc_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<DcRequest>, JsonRejection>,
) -> Result<Json<DcIdResponse>, ApiError> {
    let Json(request) = payload?;
    let dc_id = run_blocking(&state, move |store| store.add_dc(&request.dc_name)).await?;
    Ok(Json(DcIdResponse { dc_id }))
}

/// Handler for `PUT /v1/dc/{name}`.
pub async fn update_dc_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<DcRequest>, JsonRejection>,
) -> Result<Json<DcIdResponse>, ApiError> {
    let Json(request) = payload?;
    let dc_id =
        run_blocking(&state, move |store| store.update_dc(&name, &request.dc_name)).await?;
    Ok(Json(DcIdResponse { dc_id }))
}

/// Handler for `GET /v1/dc`.
pub async fn list_dcs_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Results<Dc>>, ApiError> {
    let results = run_blocking(&state, |store| store.get_dcs()).await?;
    Ok(Json(Results { results }))
}

/// Handler for `GET /v1/health`.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<HealthResponse> {
    let cache = state.store.cache();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        topics: cache.topic_count(),
        dcs: cache.dc_count(),
        failures: state.store.failure_counts(),
    })
}

fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{key} must be an integer, got '{value}'")))
}

/// Builds a search from query-string pairs. Unknown keys are ignored.
pub fn parse_event_query(pairs: Vec<(String, String)>) -> Result<EventQuery, ApiError> {
    let mut query = EventQuery::default();
    for (key, value) in pairs {
        match key.as_str() {
            "topic_name" => query.topic_name.push(value),
            "dc" => query.dc.push(value),
            "host" => query.host.push(value),
            "target_host" => query.target_host.push(value),
            "tag_set" => query.tag_set.push(value),
            "user" => query.user.push(value),
            "parent_event_id" => query.parent_event_id.push(value),
            "start_event_time" => query.start_event_time = parse_int(&key, &value)?,
            "end_event_time" => query.end_event_time = parse_int(&key, &value)?,
            "start_received_time" => query.start_received_time = parse_int(&key, &value)?,
            "end_received_time" => query.end_received_time = parse_int(&key, &value)?,
            "from" => query.from = parse_int(&key, &value)?,
            "size" => query.size = parse_int(&key, &value)?,
            _ => {}
        }
    }
    Ok(query)
}

/// Builds an id scan from query-string pairs. Unknown keys are ignored.
pub fn parse_time_query(pairs: Vec<(String, String)>) -> Result<TimeQuery, ApiError> {
    let mut query = TimeQuery::default();
    for (key, value) in pairs {
        match key.as_str() {
            "start_event_time" => query.start_event_time = parse_int(&key, &value)?,
            "end_event_time" => query.end_event_time = parse_int(&key, &value)?,
            "limit" => query.limit = parse_int(&key, &value)?,
            "ascending" => {
                query.ascending = match value.as_str() {
                    "true" | "1" => true,
                    "false" | "0" | "" => false,
                    other => {
                        return Err(ApiError::BadRequest(format!(
                            "ascending must be true or false, got '{other}'"
                        )))
                    }
                }
            }
            _ => {}
        }
    }
    Ok(query)
}
