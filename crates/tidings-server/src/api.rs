//! Request/response handlers for appending to and reading topics.

use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tidings_store::StoreError;
use tidings_types::{AppendResponse, GenerationId, NotificationsResponse, TopicsResponse};

/// Query parameters accepted by topic reads and watches.
///
/// Both are optional, and an empty value means the same as an absent one.
#[derive(Debug, Default, Deserialize)]
pub struct TopicQuery {
    /// The generation the client last saw. Never validated.
    #[serde(rename = "generationID")]
    pub generation_id: Option<String>,
    /// First index to return, as a base-10 unsigned integer.
    #[serde(rename = "fromIndex")]
    pub from_index: Option<String>,
}

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Closed(_) => ApiError::ServiceUnavailable(e.to_string()),
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

/// Parses the `fromIndex` query value.
///
/// Absent or empty means `0`. Anything else must be ASCII digits that fit
/// in a `u64`; signs and whitespace are rejected.
pub fn parse_from_index(raw: Option<&str>) -> Result<u64, ApiError> {
    let raw = match raw {
        None | Some("") => return Ok(0),
        Some(raw) => raw,
    };

    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest(format!(
            "invalid 'fromIndex' {raw:?}: expected a non-negative integer"
        )));
    }
    raw.parse::<u64>().map_err(|e| {
        ApiError::BadRequest(format!("invalid 'fromIndex' {raw:?}: {e}"))
    })
}

/// Rejects topic names that are empty or only whitespace.
pub fn validate_topic(topic: &str) -> Result<(), ApiError> {
    if topic.trim().is_empty() {
        return Err(ApiError::BadRequest("must provide topic".to_string()));
    }
    Ok(())
}

/// Logs when a client presents a generation other than the current one.
///
/// The server never acts on this; resynchronising is the client's job.
pub(crate) fn note_generation(topic: &str, claimed: Option<&str>, current: &GenerationId) {
    if let Some(claimed) = claimed.filter(|g| !g.is_empty()) {
        if claimed != current.as_str() {
            tracing::debug!(
                topic,
                claimed,
                current = %current,
                "client generation differs from current generation"
            );
        }
    }
}

/// Runs a blocking store call on the blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
        .map_err(ApiError::from)
}

/// Handler for `POST /topics/{topic}`.
///
/// The body may be any JSON value; no `Content-Type` is required.
pub async fn append_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(topic): Path<String>,
    body: Bytes,
) -> Result<Json<AppendResponse>, ApiError> {
    validate_topic(&topic)?;
    let data: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON payload: {}", e)))?;

    let manager = state.manager.clone();
    let topic_clone = topic.clone();
    let index = run_blocking(move || manager.append(&topic_clone, &data))
        .await
        .inspect_err(|e| tracing::error!(topic = %topic, error = %e, "append failed"))?;

    tracing::debug!(topic = %topic, index, "appended notification");
    Ok(Json(AppendResponse { index }))
}

/// Handler for `GET /topics/{topic}`.
///
/// A topic nobody has written to yields an empty list.
pub async fn get_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<TopicQuery>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    validate_topic(&topic)?;
    let from_index = parse_from_index(params.from_index.as_deref())?;
    note_generation(
        &topic,
        params.generation_id.as_deref(),
        state.manager.generation_id(),
    );

    let manager = state.manager.clone();
    let response = run_blocking(move || manager.get(&topic, from_index)).await?;
    Ok(Json(response))
}

/// Handler for `GET /topics`.
pub async fn list_topics_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<TopicsResponse> {
    Json(TopicsResponse {
        generation_id: state.manager.generation_id().clone(),
        topics: state.manager.topics(),
    })
}
