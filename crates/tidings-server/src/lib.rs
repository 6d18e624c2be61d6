//! Tidings server library logic.
//!
//! Exposes the notification store over HTTP:
//!
//! | Route | Handler |
//! |-------|---------|
//! | `POST /topics/{topic}` | append a JSON payload |
//! | `GET /topics/{topic}` | read from `fromIndex` |
//! | `GET /topics/{topic}/watch` | WebSocket push stream |
//! | `GET /topics` | list known topics |
//! | `GET /health` | liveness and current generation |

pub mod api;
pub mod api_watch;
pub mod config;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tidings_store::StoreManager;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Owner of every topic store.
    pub manager: Arc<StoreManager>,
    /// Live watch sessions.
    pub watches: api_watch::WatchTracker,
    /// Delay between pushes on a watch connection.
    pub push_interval: Duration,
}

/// Shortest delay between watch pushes.
pub const MIN_PUSH_INTERVAL: Duration = Duration::from_millis(10);

impl AppState {
    /// `push_interval` is raised to [`MIN_PUSH_INTERVAL`] if shorter.
    pub fn new(manager: Arc<StoreManager>, push_interval: Duration) -> Self {
        if push_interval < MIN_PUSH_INTERVAL {
            tracing::warn!(
                requested_ms = push_interval.as_millis() as u64,
                min_ms = MIN_PUSH_INTERVAL.as_millis() as u64,
                "push interval too short, using minimum"
            );
        }
        Self {
            manager,
            watches: api_watch::WatchTracker::new(),
            push_interval: push_interval.max(MIN_PUSH_INTERVAL),
        }
    }
}

/// Maximum request body size (2 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "generationID": state.manager.generation_id(),
        "watches": state.watches.active(),
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/topics", get(api::list_topics_handler))
        .route(
            "/topics/{topic}",
            post(api::append_handler).get(api::get_handler),
        )
        .route("/topics/{topic}/watch", get(api_watch::watch_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
