//! WebSocket watch sessions.
//!
//! A watch turns a topic into a periodic push stream: every `push_interval`
//! the session reads the topic from the client's `fromIndex` and sends the
//! whole [`NotificationsResponse`] as one text frame.
//!
//! The cursor never advances. Each push carries everything retained from
//! `fromIndex` onwards, including notifications already pushed earlier, so
//! delivery is at-least-once and clients deduplicate by `index`.
//!
//! A session ends when the peer closes or a write fails or stalls (no close
//! frame is sent), when the store read fails (close code 1011 with the error
//! as the reason), or when the server shuts down (close code 1001). Shutdown
//! interrupts a push that is blocked on a peer which stopped reading, and
//! the close frame itself is only attempted for a bounded time.

use crate::api::{note_generation, parse_from_index, validate_topic, ApiError, TopicQuery};
use crate::AppState;
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Extension, Path, Query, WebSocketUpgrade,
    },
    response::Response,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tidings_types::NotificationsResponse;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Close frame reasons are limited to 123 bytes by RFC 6455.
const MAX_CLOSE_REASON_BYTES: usize = 123;

/// A push that cannot be written within this long drops the connection.
const PUSH_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on delivering a close frame to a peer that may not be reading.
const CLOSE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Tracks live watch sessions so shutdown can stop and await them.
#[derive(Clone, Default)]
pub struct WatchTracker {
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl WatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently running.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Signals every session to close. Does not wait.
    pub fn cancel(&self) {
        self.shutdown.cancel();
        self.tasks.close();
    }

    /// Signals every session to close and waits until all have finished.
    pub async fn shutdown(&self) {
        self.cancel();
        self.tasks.wait().await;
        tracing::info!("all watch sessions closed");
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn track<F>(&self, session: F) -> impl Future<Output = F::Output> + Send + 'static
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tasks.track_future(session)
    }
}

/// Why a session stopped polling.
#[derive(Debug)]
enum SessionEnd {
    PeerClosed,
    WriteFailed(axum::Error),
    WriteStalled,
    StoreFailed(String),
    ServerShutdown,
}

/// Handler for `GET /topics/{topic}/watch`.
///
/// `fromIndex` is validated before the upgrade so a malformed value gets a
/// plain `400` instead of a WebSocket.
pub async fn watch_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(topic): Path<String>,
    Query(params): Query<TopicQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    validate_topic(&topic)?;
    let from_index = parse_from_index(params.from_index.as_deref()).inspect_err(|e| {
        tracing::warn!(topic = %topic, error = %e, "rejecting watch request");
    })?;
    if state.watches.is_shutting_down() {
        return Err(ApiError::ServiceUnavailable(
            "server is shutting down".to_string(),
        ));
    }
    note_generation(
        &topic,
        params.generation_id.as_deref(),
        state.manager.generation_id(),
    );

    let watches = state.watches.clone();
    let shutdown = watches.token();
    let failed_topic = topic.clone();
    let response = ws
        .on_failed_upgrade(move |e| {
            tracing::warn!(topic = %failed_topic, error = %e, "failed to upgrade watch connection");
        })
        .on_upgrade(move |socket| {
            watches.track(run_watch_session(socket, state, topic, from_index, shutdown))
        });
    Ok(response)
}

async fn run_watch_session(
    mut socket: WebSocket,
    state: Arc<AppState>,
    topic: String,
    from_index: u64,
    shutdown: CancellationToken,
) {
    tracing::info!(topic = %topic, from_index, "watch session established");

    let end = poll_topic(&mut socket, &state, &topic, from_index, &shutdown).await;

    match &end {
        SessionEnd::PeerClosed => {
            tracing::info!(topic = %topic, "watch peer closed the connection");
        }
        SessionEnd::WriteFailed(e) => {
            tracing::info!(topic = %topic, error = %e, "watch push failed, dropping connection");
        }
        SessionEnd::WriteStalled => {
            tracing::warn!(
                topic = %topic,
                timeout_secs = PUSH_WRITE_TIMEOUT.as_secs(),
                "watch peer stopped reading, dropping connection"
            );
        }
        SessionEnd::StoreFailed(reason) => {
            tracing::warn!(topic = %topic, error = %reason, "closing watch due to store error");
            send_close(&mut socket, close_code::ERROR, reason).await;
        }
        SessionEnd::ServerShutdown => {
            send_close(&mut socket, close_code::AWAY, "server shutting down").await;
        }
    }

    tracing::info!(topic = %topic, "terminating watch session");
}

/// Reads and pushes until something ends the session.
async fn poll_topic(
    socket: &mut WebSocket,
    state: &AppState,
    topic: &str,
    from_index: u64,
    shutdown: &CancellationToken,
) -> SessionEnd {
    loop {
        if shutdown.is_cancelled() {
            return SessionEnd::ServerShutdown;
        }

        let response = match read_topic(state, topic, from_index).await {
            Ok(response) => response,
            Err(reason) => return SessionEnd::StoreFailed(reason),
        };
        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => return SessionEnd::StoreFailed(format!("failed to encode response: {e}")),
        };
        // A peer that stops reading blocks the write once its buffers fill,
        // so shutdown has to be observed here as well as between pushes.
        tokio::select! {
            sent = timeout(PUSH_WRITE_TIMEOUT, socket.send(Message::Text(frame.into()))) => {
                match sent {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return SessionEnd::WriteFailed(e),
                    Err(_) => return SessionEnd::WriteStalled,
                }
            }
            () = shutdown.cancelled() => return SessionEnd::ServerShutdown,
        }

        // Keep reading while waiting so a close from the peer ends the
        // session now rather than at the next push.
        let tick = sleep(state.push_interval);
        tokio::pin!(tick);
        loop {
            tokio::select! {
                () = &mut tick => break,
                () = shutdown.cancelled() => return SessionEnd::ServerShutdown,
                incoming = socket.recv() => match incoming {
                    None | Some(Ok(Message::Close(_))) => return SessionEnd::PeerClosed,
                    Some(Err(e)) => {
                        tracing::debug!(topic, error = %e, "watch read failed");
                        return SessionEnd::PeerClosed;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }
}

async fn read_topic(
    state: &AppState,
    topic: &str,
    from_index: u64,
) -> Result<NotificationsResponse, String> {
    let manager = state.manager.clone();
    let topic = topic.to_string();
    tokio::task::spawn_blocking(move || manager.get(&topic, from_index))
        .await
        .map_err(|e| format!("task join error: {e}"))?
        .map_err(|e| e.to_string())
}

async fn send_close(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: truncate_reason(reason).into(),
    };
    match timeout(CLOSE_WRITE_TIMEOUT, socket.send(Message::Close(Some(frame)))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "failed to send close frame"),
        Err(_) => tracing::debug!(code, "peer did not accept close frame in time"),
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_reasons_are_kept() {
        assert_eq!(truncate_reason("store closed"), "store closed");
    }

    #[test]
    fn long_reasons_are_cut_on_a_char_boundary() {
        let reason = "é".repeat(100);
        let cut = truncate_reason(&reason);
        assert!(cut.len() <= MAX_CLOSE_REASON_BYTES);
        assert_eq!(cut.len(), 122);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[tokio::test]
    async fn tracker_shutdown_waits_for_sessions() {
        let tracker = WatchTracker::new();
        let token = tracker.token();
        let session = tracker.track(async move {
            token.cancelled().await;
        });
        let handle = tokio::spawn(session);
        assert_eq!(tracker.active(), 1);

        tracker.shutdown().await;

        assert!(tracker.is_shutting_down());
        assert_eq!(tracker.active(), 0);
        handle.await.expect("session should finish cleanly");
    }
}
