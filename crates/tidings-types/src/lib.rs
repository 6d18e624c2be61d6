//! Shared wire types for the Tidings notification broker.
//!
//! These are the values that cross crate boundaries: the store produces
//! them, the server serializes them onto HTTP responses and WebSocket
//! frames, and clients deserialize them back. Field names on the wire use
//! the `generationID` spelling that existing consumers already expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one running incarnation of the notification store.
///
/// A fresh value is minted every time the store manager opens its backing
/// database. Consumers that observe a different value than the one they
/// cached must treat every index they know as void and resume from `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(String);

impl GenerationId {
    /// Mints a new random generation identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for GenerationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single record in a topic log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Position in the topic log. Assigned by the store, never reused.
    pub index: u64,
    /// Wall-clock time of the append. Only used for retention.
    pub timestamp: DateTime<Utc>,
    /// The producer's payload, returned verbatim.
    pub data: serde_json::Value,
}

/// Response to a read of a topic, and the frame pushed to watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationsResponse {
    /// Generation of the store that served the read.
    #[serde(rename = "generationID")]
    pub generation_id: GenerationId,
    /// Retained notifications at or after the requested index, ascending.
    pub notifications: Vec<Notification>,
}

impl NotificationsResponse {
    /// Returns the highest index in this response, if any.
    pub fn last_index(&self) -> Option<u64> {
        self.notifications.last().map(|n| n.index)
    }
}

/// Response body for a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    /// The index assigned to the appended notification.
    pub index: u64,
}

/// Response body listing known topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicsResponse {
    #[serde(rename = "generationID")]
    pub generation_id: GenerationId,
    pub topics: Vec<String>,
}
