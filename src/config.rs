/*!
 * Configuration types for Relay
 *
 * Durations are plain millisecond integers so the TOML stays readable:
 *
 * ```toml
 * [client]
 * name = "hello-client"
 * hosts = ["127.0.0.1:8080"]
 * host_connection_limit = 2
 * retries = 2
 *
 * [server]
 * bind_to = "127.0.0.1:8080"
 * read_timeout_ms = 2000
 * ```
 */

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BuildError, Result};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub worker_pool: WorkerPoolSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name used in logs and stats
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Candidate endpoints, as `host:port`
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Maximum concurrently active connections per host
    #[serde(default = "default_host_connection_limit")]
    pub host_connection_limit: usize,

    /// Maximum requests waiting for a connection per host (None = unbounded)
    #[serde(default)]
    pub host_connection_max_waiters: Option<usize>,

    /// Bound on acquiring or establishing a connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bound on awaiting a reply
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Additional attempts after a transient failure
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base delay between attempts (doubles each retry)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// How requests are spread across hosts
    #[serde(default)]
    pub load_balancer: LoadBalancerKind,

    /// Close connections idle for longer than this (None = keep)
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            hosts: Vec::new(),
            host_connection_limit: default_host_connection_limit(),
            host_connection_max_waiters: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            load_balancer: LoadBalancerKind::default(),
            idle_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Host selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    /// Cycle through hosts in order
    #[default]
    RoundRobin,

    /// Pick the host with the fewest outstanding requests
    LeastLoaded,
}

/// Server endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name used in logs and stats
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Address to listen on
    #[serde(default = "default_bind_to")]
    pub bind_to: String,

    /// Close a connection that sends no request for this long
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Largest accepted frame in bytes
    #[serde(default = "default_max_frame_length")]
    pub max_frame_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            bind_to: default_bind_to(),
            read_timeout_ms: default_read_timeout_ms(),
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolSettings {
    /// Number of worker threads
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Bound on queued-but-not-started work (None = unbounded)
    #[serde(default)]
    pub max_queued: Option<usize>,
}

impl Default for WorkerPoolSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_queued: None,
        }
    }
}

/// Logging output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout); file output is JSON
    #[serde(default)]
    pub file: Option<std::path::PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_client_name() -> String {
    "relay-client".to_string()
}

fn default_server_name() -> String {
    "relay-server".to_string()
}

fn default_host_connection_limit() -> usize {
    2
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    10
}

fn default_bind_to() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_read_timeout_ms() -> u64 {
    2_000
}

fn default_max_frame_length() -> usize {
    8 * 1024 * 1024 // 8 MB
}

fn default_pool_size() -> usize {
    6
}

impl RelayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BuildError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| BuildError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), contents)
            .map_err(|e| BuildError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.client.host_connection_limit, 2);
        assert_eq!(config.client.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.client.retries, 2);
        assert_eq!(config.server.read_timeout(), Duration::from_secs(2));
        assert_eq!(config.worker_pool.pool_size, 6);
        assert_eq!(config.logging.level, LogLevel::Info);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [client]
            hosts = ["10.0.0.1:9000", "10.0.0.2:9000"]
            load_balancer = "least_loaded"
            idle_timeout_ms = 500

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.hosts.len(), 2);
        assert_eq!(config.client.load_balancer, LoadBalancerKind::LeastLoaded);
        assert_eq!(config.client.idle_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(config.client.name, "relay-client");
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_file_roundtrip() {
        let mut config = RelayConfig::default();
        config.client.hosts = vec!["localhost:8080".to_string()];
        config.worker_pool.max_queued = Some(128);

        let file = NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();
        let loaded = RelayConfig::from_file(file.path()).unwrap();

        assert_eq!(loaded.client, config.client);
        assert_eq!(loaded.worker_pool, config.worker_pool);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "[client\nhosts = 3").unwrap();
        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(BuildError::Config(_))
        ));
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::Error.to_tracing_level(), tracing::Level::ERROR);
        assert_eq!(LogLevel::Warn.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(LogLevel::Info.to_tracing_level(), tracing::Level::INFO);
        assert_eq!(LogLevel::Debug.to_tracing_level(), tracing::Level::DEBUG);
        assert_eq!(LogLevel::Trace.to_tracing_level(), tracing::Level::TRACE);
    }
}
