//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retention and push timing.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file holding every topic.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Retention window, eviction cadence and watch push cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// How long notifications stay readable, in seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Milliseconds between eviction sweeps.
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,

    /// Milliseconds between pushes on a watch connection.
    #[serde(default = "default_push_interval_ms")]
    pub push_interval_ms: u64,
}

impl NotificationsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn push_interval(&self) -> Duration {
        Duration::from_millis(self.push_interval_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tidings_store=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    9099
}

fn default_db_path() -> String {
    "tidings.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_retention_secs() -> u64 {
    24 * 60 * 60
}

fn default_gc_interval_ms() -> u64 {
    10 * 60 * 1_000
}

fn default_push_interval_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            retention_secs: default_retention_secs(),
            gc_interval_ms: default_gc_interval_ms(),
            push_interval_ms: default_push_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A timing setting that must be positive was zero.
    #[error("notifications.{0} must be greater than zero")]
    InvalidDuration(&'static str),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TIDINGS_HOST` overrides `server.host`
/// - `TIDINGS_PORT` overrides `server.port`
/// - `TIDINGS_DB_PATH` overrides `database.path`
/// - `TIDINGS_RETENTION_SECS` overrides `notifications.retention_secs`
/// - `TIDINGS_GC_INTERVAL_MS` overrides `notifications.gc_interval_ms`
/// - `TIDINGS_PUSH_INTERVAL_MS` overrides `notifications.push_interval_ms`
/// - `TIDINGS_LOG_LEVEL` overrides `logging.level`
/// - `TIDINGS_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the resulting intervals are zero.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`], reading overrides through `env` instead of the
/// process environment.
pub fn load_config_with_env<F>(path: Option<&str>, env: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(parsed) = env("TIDINGS_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = env("TIDINGS_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = env("TIDINGS_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(parsed) = env("TIDINGS_RETENTION_SECS").and_then(|v| v.parse().ok()) {
        config.notifications.retention_secs = parsed;
    }
    if let Some(parsed) = env("TIDINGS_GC_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.notifications.gc_interval_ms = parsed;
    }
    if let Some(parsed) = env("TIDINGS_PUSH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        config.notifications.push_interval_ms = parsed;
    }
    if let Some(level) = env("TIDINGS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = env("TIDINGS_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }

    if config.notifications.gc_interval_ms == 0 {
        return Err(ConfigError::InvalidDuration("gc_interval_ms"));
    }
    if config.notifications.push_interval_ms == 0 {
        return Err(ConfigError::InvalidDuration("push_interval_ms"));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = load_config_with_env(Some("/nonexistent/tidings.toml"), no_env)
            .expect("missing file should fall back to defaults");
        assert_eq!(config.server.port, 9099);
        assert_eq!(config.database.path, "tidings.db");
        assert_eq!(config.notifications.retention(), Duration::from_secs(86_400));
        assert_eq!(config.notifications.gc_interval(), Duration::from_secs(600));
        assert_eq!(config.notifications.push_interval(), Duration::from_secs(5));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn file_values_and_env_overrides_apply() {
        let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
        write!(
            file,
            r#"
            [server]
            port = 4000

            [notifications]
            retention_secs = 1
            gc_interval_ms = 100
            push_interval_ms = 200
            "#
        )
        .expect("should write config");

        let env: HashMap<&str, &str> = HashMap::from([
            ("TIDINGS_PORT", "4100"),
            ("TIDINGS_DB_PATH", "/tmp/override.db"),
            ("TIDINGS_LOG_JSON", "1"),
        ]);
        let config = load_config_with_env(file.path().to_str(), |key| {
            env.get(key).map(|v| v.to_string())
        })
        .expect("config should load");

        assert_eq!(config.server.port, 4100);
        assert_eq!(config.database.path, "/tmp/override.db");
        assert!(config.logging.json);
        assert_eq!(config.notifications.retention(), Duration::from_secs(1));
        assert_eq!(config.notifications.gc_interval(), Duration::from_millis(100));
        assert_eq!(config.notifications.push_interval(), Duration::from_millis(200));
    }

    #[test]
    fn zero_push_interval_is_rejected() {
        let err = load_config_with_env(None, |key| {
            (key == "TIDINGS_PUSH_INTERVAL_MS").then(|| "0".to_string())
        })
        .expect_err("zero push interval should be rejected");
        assert!(matches!(err, ConfigError::InvalidDuration("push_interval_ms")));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
        write!(file, "[server\nport = ").expect("should write config");
        let err = load_config_with_env(file.path().to_str(), no_env)
            .expect_err("malformed toml should fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
