//! Versioned schema for the notification database.
//!
//! Each `.sql` file under `migrations/` is compiled into the binary and
//! applied at most once, in list order. Applied names are recorded in
//! `_tidings_migrations`; a migration and its record commit together.

use std::collections::HashSet;

use rusqlite::Connection;
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Append only. Renaming or reordering an entry re-applies it on existing databases.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_topics",
        sql: include_str!("migrations/000_topics.sql"),
    },
    Migration {
        name: "001_notifications",
        sql: include_str!("migrations/001_notifications.sql"),
    },
    Migration {
        name: "002_generations",
        sql: include_str!("migrations/002_generations.sql"),
    },
];

const CREATE_HISTORY_TABLE: &str = "CREATE TABLE IF NOT EXISTS _tidings_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    /// The `_tidings_migrations` history table could not be created.
    #[error("failed to create migration history table: {0}")]
    Bootstrap(#[source] rusqlite::Error),

    /// The history table could not be read.
    #[error("failed to check migration state: {0}")]
    StateQuery(#[source] rusqlite::Error),

    /// A migration (or recording it) failed; nothing from it was kept.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },
}

/// Brings the schema up to date and returns how many migrations ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

fn applied_names(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM _tidings_migrations")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO _tidings_migrations (name) VALUES (?1)",
        [migration.name],
    )?;
    tx.commit()
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    conn.execute_batch(CREATE_HISTORY_TABLE)
        .map_err(MigrationError::Bootstrap)?;
    let done = applied_names(conn).map_err(MigrationError::StateQuery)?;

    let pending: Vec<&Migration> = migrations
        .iter()
        .filter(|m| !done.contains(m.name))
        .collect();
    if pending.is_empty() {
        tracing::debug!(known = done.len(), "schema is up to date");
        return Ok(0);
    }

    for migration in &pending {
        tracing::info!(migration = migration.name, "applying migration");
        apply(conn, migration).map_err(|source| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source,
        })?;
    }

    Ok(pending.len())
}
