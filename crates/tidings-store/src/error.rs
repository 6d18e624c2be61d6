//! Error types for the notification store.

/// Errors that can occur during notification store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A database operation failed.
    #[error("store database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("store connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A payload could not be serialized or a stored payload could not be read back.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored timestamp is outside the range `chrono` can represent.
    #[error("corrupt timestamp {millis} on notification {index} of topic '{topic}'")]
    CorruptTimestamp {
        topic: String,
        index: i64,
        millis: i64,
    },

    /// The topic has exhausted the index space.
    #[error("index space exhausted for topic '{0}'")]
    IndexOverflow(String),

    /// The store (or the whole manager) has been closed.
    #[error("store closed: {0}")]
    Closed(String),

    /// The manager was opened with unusable timing settings.
    #[error("invalid store settings: {0}")]
    InvalidSettings(String),

    /// The manager was opened outside of a tokio runtime.
    #[error("no async runtime available: {0}")]
    Runtime(String),
}
