//! Durable, indexed, per-topic notification logs.
//!
//! A [`StoreManager`] owns one SQLite database (through a `tidings-db`
//! pool), one [`GenerationId`](tidings_types::GenerationId) for the
//! lifetime of the process, and a lazily populated map of [`TopicStore`]s.
//! A background task evicts notifications older than the retention window
//! every `gc_interval`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tidings_store::{StoreManager, StoreSettings};
//!
//! let manager = StoreManager::open(pool, StoreSettings::default())?;
//! let index = manager.append("orders", &serde_json::json!({"id": 7}))?;
//! let response = manager.get("orders", index)?;
//! assert_eq!(response.notifications[0].index, index);
//! manager.shutdown().await;
//! ```
//!
//! All store methods are synchronous and perform blocking SQLite I/O; async
//! callers should run them on the blocking pool.

mod error;
mod eviction;
mod manager;
mod topic;

pub use error::StoreError;
pub use manager::{EvictionReport, StoreManager, StoreSettings};
pub use topic::TopicStore;
