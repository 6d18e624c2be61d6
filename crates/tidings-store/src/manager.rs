//! Process-wide registry of topic stores.
//!
//! The [`StoreManager`] owns the database pool, the generation identifier
//! for this run, the map of topic stores, and the background eviction task.
//! Topic stores are created on first append (or loaded at open when an
//! earlier run persisted them) and never removed while the manager is
//! running.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tidings_db::DbPool;
use tidings_types::{GenerationId, NotificationsResponse};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::eviction::run_eviction_loop;
use crate::topic::TopicStore;

/// Retention and sweep timing for a [`StoreManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    /// How long a notification is guaranteed to stay readable.
    pub retention: Duration,
    /// Period between eviction sweeps.
    pub gc_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            gc_interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Outcome of one eviction sweep across all topics.
#[derive(Debug, Default)]
pub struct EvictionReport {
    /// Number of topics swept successfully.
    pub swept: usize,
    /// Total notifications removed.
    pub removed: usize,
    /// Topics whose sweep failed, with the error.
    pub failed: Vec<(String, StoreError)>,
}

/// Owns every topic store and the shared generation identifier.
pub struct StoreManager {
    pool: DbPool,
    settings: StoreSettings,
    generation_id: GenerationId,
    topics: Mutex<HashMap<String, Arc<TopicStore>>>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    eviction_task: Mutex<Option<JoinHandle<()>>>,
}

impl StoreManager {
    /// Opens the store on an already migrated database and starts the
    /// eviction task on the current tokio runtime.
    ///
    /// A fresh [`GenerationId`] is minted and recorded for this run. Topics
    /// persisted by earlier runs are registered up front so the eviction
    /// task sweeps them even if nobody reads or writes them again.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidSettings` for a zero `gc_interval`,
    /// `StoreError::Runtime` when called outside a tokio runtime, or a
    /// database error if the generation cannot be recorded.
    pub fn open(pool: DbPool, settings: StoreSettings) -> Result<Arc<Self>, StoreError> {
        if settings.gc_interval.is_zero() {
            return Err(StoreError::InvalidSettings(
                "gc_interval must be greater than zero".to_string(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::Runtime(e.to_string()))?;

        let generation_id = GenerationId::generate();
        let known_topics = {
            let conn = pool.get()?;

            let previous: Option<String> = conn
                .query_row(
                    "SELECT generation_id FROM generations
                     ORDER BY started_at_ms DESC, rowid DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            conn.execute(
                "INSERT INTO generations (generation_id, started_at_ms) VALUES (?1, ?2)",
                params![generation_id.as_str(), Utc::now().timestamp_millis()],
            )?;

            tracing::info!(
                generation_id = %generation_id,
                previous = previous.as_deref().unwrap_or("<none>"),
                "opened notification store"
            );

            let mut stmt = conn.prepare("SELECT name FROM topics ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            names
        };

        let topics = known_topics
            .into_iter()
            .map(|name| {
                let store = TopicStore::new(
                    name.clone(),
                    pool.clone(),
                    generation_id.clone(),
                    settings.retention,
                );
                (name, Arc::new(store))
            })
            .collect::<HashMap<_, _>>();

        let manager = Arc::new(Self {
            pool,
            settings,
            generation_id,
            topics: Mutex::new(topics),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            eviction_task: Mutex::new(None),
        });

        let handle = runtime.spawn(run_eviction_loop(
            Arc::downgrade(&manager),
            settings.gc_interval,
            manager.shutdown.clone(),
        ));
        *manager
            .eviction_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        Ok(manager)
    }

    /// The generation identifier shared by every response of this run.
    pub fn generation_id(&self) -> &GenerationId {
        &self.generation_id
    }

    /// The retention and sweep settings this manager was opened with.
    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    /// Returns the store for `topic`, creating and registering an empty one
    /// if this is the first time the topic is seen.
    ///
    /// Creation happens under the registry mutex, so concurrent callers for
    /// the same new topic all receive the same store.
    pub fn get_or_create(&self, topic: &str) -> Result<Arc<TopicStore>, StoreError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed("store manager".to_string()));
        }

        if let Some(store) = topics.get(topic) {
            return Ok(store.clone());
        }

        tracing::debug!(topic, "registering new topic store");
        let store = Arc::new(TopicStore::new(
            topic.to_string(),
            self.pool.clone(),
            self.generation_id.clone(),
            self.settings.retention,
        ));
        topics.insert(topic.to_string(), store.clone());
        Ok(store)
    }

    /// Appends `data` to `topic` and returns the assigned index.
    pub fn append(&self, topic: &str, data: &serde_json::Value) -> Result<u64, StoreError> {
        self.get_or_create(topic)?.append(data)
    }

    /// Reads `topic` from `from_index` onwards.
    ///
    /// A topic that has never been appended to reads as empty and is not
    /// registered, so reads and watches on arbitrary names leave no trace.
    pub fn get(&self, topic: &str, from_index: u64) -> Result<NotificationsResponse, StoreError> {
        match self.registered(topic)? {
            Some(store) => store.get(from_index),
            None => Ok(NotificationsResponse {
                generation_id: self.generation_id.clone(),
                notifications: Vec::new(),
            }),
        }
    }

    /// Every topic with persisted state is registered at open or on its
    /// first append, so an unregistered topic holds no notifications.
    fn registered(&self, topic: &str) -> Result<Option<Arc<TopicStore>>, StoreError> {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed("store manager".to_string()));
        }
        Ok(topics.get(topic).cloned())
    }

    /// Names of every topic known to this manager, sorted.
    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = topics.keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs one eviction sweep over every known topic.
    ///
    /// Each topic is swept independently: a failure is logged and recorded
    /// in the report, and the remaining topics are still swept.
    pub fn evict_all(&self, now: DateTime<Utc>) -> EvictionReport {
        let stores: Vec<Arc<TopicStore>> = {
            let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            topics.values().cloned().collect()
        };

        let mut report = EvictionReport::default();
        for store in stores {
            match store.evict(now) {
                Ok(removed) => {
                    report.swept += 1;
                    report.removed += removed;
                }
                Err(e) => {
                    tracing::warn!(topic = %store.name(), error = %e, "failed to evict topic");
                    report.failed.push((store.name().to_string(), e));
                }
            }
        }
        report
    }

    /// Stops the eviction task and closes every topic store.
    ///
    /// Only the first call does any work. Reads and appends already running
    /// finish normally; new ones fail with `StoreError::Closed`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shutdown.cancel();
        let handle = self
            .eviction_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "eviction task panicked or was cancelled");
            }
        }

        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        for store in topics.values() {
            store.close();
        }
        tracing::info!(
            generation_id = %self.generation_id,
            topics = topics.len(),
            "notification store shut down"
        );
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StoreManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for StoreManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreManager")
            .field("generation_id", &self.generation_id)
            .field("settings", &self.settings)
            .field("closed", &self.is_shut_down())
            .finish()
    }
}
