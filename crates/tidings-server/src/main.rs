//! Tidings server binary.
//!
//! Starts an axum HTTP server with structured logging, database
//! initialization, the notification store, and graceful shutdown on
//! SIGTERM/SIGINT.

use std::net::SocketAddr;
use tidings_server::{app, config, AppState};
use tidings_store::{StoreManager, StoreSettings};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("TIDINGS_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let pool = tidings_db::create_pool(
        &config.database.path,
        tidings_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool, check database.path");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            tidings_db::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    let manager = StoreManager::open(
        pool,
        StoreSettings {
            retention: config.notifications.retention(),
            gc_interval: config.notifications.gc_interval(),
        },
    )
    .expect("failed to open notification store");

    let state = AppState::new(manager.clone(), config.notifications.push_interval());
    let watches = state.watches.clone();
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(
        %addr,
        generation_id = %manager.generation_id(),
        retention_secs = config.notifications.retention_secs,
        gc_interval_ms = config.notifications.gc_interval_ms,
        push_interval_ms = config.notifications.push_interval_ms,
        "starting tidings server"
    );

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind listen address");

    // Upgraded watch connections are not covered by the HTTP graceful
    // shutdown, so they are cancelled as soon as the signal arrives.
    let signal_watches = watches.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_watches.cancel();
        })
        .await
        .expect("server error");

    watches.shutdown().await;
    manager.shutdown().await;

    tracing::info!("tidings server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
