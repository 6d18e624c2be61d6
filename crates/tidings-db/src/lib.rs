//! Database layer for the Tidings notification broker.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. All topics share one database file; every
//! table is created through versioned migrations managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: readers see a consistent snapshot while a
//!   single writer appends or evicts, which is the access pattern of a
//!   topic log.
//! - **`r2d2` connection pool**: bounded connection reuse for the blocking
//!   store operations issued from the async server.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, so the schema ships with the code that depends on it.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
