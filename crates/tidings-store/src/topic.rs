//! Durable append-only log for a single topic.
//!
//! Every topic shares the manager's SQLite database and owns the rows
//! keyed by its name. Writes (append and evict) take the topic's writer
//! mutex so that index allocation and eviction never interleave. Reads take
//! no in-process lock: each read is a single `SELECT`, and WAL mode hands it
//! a snapshot from either before or after any concurrent write.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tidings_db::DbPool;
use tidings_types::{GenerationId, Notification, NotificationsResponse};

use crate::error::StoreError;

/// The notification log of one topic.
pub struct TopicStore {
    name: String,
    pool: DbPool,
    generation_id: GenerationId,
    retention: Duration,
    write_lock: Mutex<()>,
    closed: AtomicBool,
}

impl TopicStore {
    pub(crate) fn new(
        name: String,
        pool: DbPool,
        generation_id: GenerationId,
        retention: Duration,
    ) -> Self {
        Self {
            name,
            pool,
            generation_id,
            retention,
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// The topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a payload and returns the index assigned to it.
    ///
    /// The first append to a topic receives index `0`; each later append
    /// receives the previous index plus one. The next index is persisted in
    /// the `topics` table, so indices stay unique even once eviction has
    /// emptied the log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Closed` after [`close`](Self::close), or a
    /// database error if the record cannot be persisted.
    pub fn append(&self, data: &serde_json::Value) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let data_json = serde_json::to_string(data)?;

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let index: i64 = tx.query_row(
            "INSERT INTO topics (name, next_index) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET next_index = next_index + 1
             RETURNING next_index - 1",
            [&self.name],
            |row| row.get(0),
        )?;
        let index = u64::try_from(index).map_err(|_| StoreError::IndexOverflow(self.name.clone()))?;

        tx.execute(
            "INSERT INTO notifications (topic, idx, timestamp_ms, data_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![&self.name, index as i64, Utc::now().timestamp_millis(), data_json],
        )?;
        tx.commit()?;

        tracing::trace!(topic = %self.name, index, "appended notification");
        Ok(index)
    }

    /// Returns every retained notification with `index >= from_index`, in
    /// ascending index order, together with the store's generation.
    ///
    /// Evicted indices are simply absent: a `from_index` below the oldest
    /// survivor starts the result at that survivor. An empty list is a
    /// normal answer.
    pub fn get(&self, from_index: u64) -> Result<NotificationsResponse, StoreError> {
        self.ensure_open()?;
        // Indices are stored as i64; anything beyond that cannot exist yet.
        let from = i64::try_from(from_index).unwrap_or(i64::MAX);

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT idx, timestamp_ms, data_json FROM notifications
             WHERE topic = ?1 AND idx >= ?2
             ORDER BY idx ASC",
        )?;
        let rows = stmt
            .query_map(params![&self.name, from], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let notifications = rows
            .into_iter()
            .map(|(index, millis, data_json)| self.decode_row(index, millis, &data_json))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NotificationsResponse {
            generation_id: self.generation_id.clone(),
            notifications,
        })
    }

    /// Deletes every notification older than `now - retention`.
    ///
    /// Runs under the writer mutex, so an append racing the sweep is neither
    /// lost nor half-visible. Returns the number of notifications removed.
    pub fn evict(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.ensure_open()?;
        let retention_ms = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff_ms = now.timestamp_millis().saturating_sub(retention_ms);

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let conn = self.pool.get()?;
        let removed = conn.execute(
            "DELETE FROM notifications WHERE topic = ?1 AND timestamp_ms < ?2",
            params![&self.name, cutoff_ms],
        )?;

        if removed > 0 {
            tracing::debug!(topic = %self.name, removed, cutoff_ms, "evicted notifications");
        }
        Ok(removed)
    }

    /// Returns the last index ever assigned in this topic, or `None` if
    /// nothing has been appended yet. Eviction does not affect the answer.
    pub fn last_index(&self) -> Result<Option<u64>, StoreError> {
        self.ensure_open()?;
        let conn = self.pool.get()?;
        let next: Option<i64> = conn
            .query_row(
                "SELECT next_index FROM topics WHERE name = ?1",
                [&self.name],
                |row| row.get(0),
            )
            .optional()?;

        Ok(next
            .filter(|n| *n > 0)
            .and_then(|n| u64::try_from(n - 1).ok()))
    }

    /// Marks the store closed. Further operations fail with
    /// `StoreError::Closed`; operations already running complete normally.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(topic = %self.name, "closed topic store");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Closed(format!("topic '{}'", self.name)));
        }
        Ok(())
    }

    fn decode_row(&self, index: i64, millis: i64, data_json: &str) -> Result<Notification, StoreError> {
        let timestamp =
            DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::CorruptTimestamp {
                topic: self.name.clone(),
                index,
                millis,
            })?;
        Ok(Notification {
            index: index as u64,
            timestamp,
            data: serde_json::from_str(data_json)?,
        })
    }
}

impl std::fmt::Debug for TopicStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicStore")
            .field("name", &self.name)
            .field("generation_id", &self.generation_id)
            .field("retention", &self.retention)
            .field("closed", &self.is_closed())
            .finish()
    }
}
