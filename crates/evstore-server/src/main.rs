//! evstore server binary.
//!
//! Opens the SQLite store, loads topic and dc metadata into memory, starts
//! the refresh loop, and serves the HTTP API until SIGINT or SIGTERM.

use std::net::SocketAddr;
use std::sync::Arc;

use evstore_core::EventStore;
use evstore_db::{DbRuntimeSettings, SqliteBackend};
use evstore_server::{app, background, config, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("EVSTORE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let backend = SqliteBackend::open(
        &config.database.path,
        DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to open event database; check database.path in config");

    let store = Arc::new(EventStore::new(Arc::new(backend)));
    let stats = store
        .refresh()
        .expect("failed to load topic and dc metadata at startup");
    tracing::info!(topics = stats.topics, dcs = stats.dcs, "metadata cache loaded");

    tokio::spawn(background::start_reconcile_task(
        Arc::clone(&store),
        config.store.refresh_interval_secs,
    ));

    let app = app(AppState::new(Arc::clone(&store)));
    let addr = SocketAddr::new(config.server.host, config.server.port);
    tracing::info!(%addr, "starting evstore server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    store.close();
    tracing::info!("evstore server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
