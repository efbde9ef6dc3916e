//! HTTP front end for the evstore event store.

pub mod api;
pub mod background;
pub mod config;

use std::sync::Arc;

use axum::{
    routing::{get, put},
    Extension, Router,
};
use evstore_core::EventStore;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EventStore>,
}

impl AppState {
    pub fn new(store: Arc<EventStore>) -> Self {
        Self { store }
    }
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(api::health_handler))
        .route(
            "/v1/event",
            get(api::find_events_handler).post(api::add_event_handler),
        )
        .route("/v1/event/{id}", get(api::get_event_handler))
        .route("/v1/event_ids", get(api::stream_event_ids_handler))
        .route(
            "/v1/topic",
            get(api::list_topics_handler).post(api::add_topic_handler),
        )
        .route(
            "/v1/topic/{name}",
            put(api::update_topic_handler).delete(api::delete_topic_handler),
        )
        .route(
            "/v1/dc",
            get(api::list_dcs_handler).post(api::add_dc_handler),
        )
        .route("/v1/dc/{name}", put(api::update_dc_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
