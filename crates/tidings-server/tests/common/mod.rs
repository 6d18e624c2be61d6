//! Shared setup for server integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tidings_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use tidings_server::{app, AppState};
use tidings_store::{StoreManager, StoreSettings};
use tokio::net::TcpListener;

/// A store manager on a fresh on-disk database.
pub struct TestStore {
    pub manager: Arc<StoreManager>,
    pub pool: DbPool,
    // Dropped last so the database file outlives the pool.
    _dir: TempDir,
}

pub fn open_store(settings: StoreSettings) -> TestStore {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("tidings.db");
    let pool = create_pool(
        path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("failed to create pool");
    {
        let conn = pool.get().expect("failed to get connection");
        run_migrations(&conn).expect("failed to run migrations");
    }
    let manager = StoreManager::open(pool.clone(), settings).expect("failed to open store");
    TestStore {
        manager,
        pool,
        _dir: dir,
    }
}

/// A running server bound to an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: TestStore,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

pub async fn spawn_server(settings: StoreSettings, push_interval: Duration) -> TestServer {
    let store = open_store(settings);
    let state = AppState::new(store.manager.clone(), push_interval);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer { addr, state, store }
}

/// Drops the notifications table out from under a running store so every
/// later read or append fails with a database error.
pub fn break_notifications_table(store: &TestStore) {
    let conn = store.pool.get().expect("failed to get connection");
    conn.execute_batch("DROP TABLE notifications;")
        .expect("failed to drop notifications table");
}

/// Store settings that never sweep during a test.
pub fn no_eviction() -> StoreSettings {
    StoreSettings {
        retention: Duration::from_secs(24 * 60 * 60),
        gc_interval: Duration::from_secs(60 * 60),
    }
}
