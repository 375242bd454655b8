//! Configuration loading for the connection-owning process.
//!
//! Configuration is loaded from a TOML file (default: `clusterlink.toml`).
//! Every section and every field is optional.

use crate::session::SessionSettings;
use link_core::ResyncPolicy;
use link_ipc::IpcConfig;
use link_watch::MultiplexerConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IPC transport configuration.
    pub ipc: IpcSection,
    /// Cluster session configuration.
    pub session: SessionSection,
    /// Watch multiplexing and stream recovery configuration.
    pub watch: WatchSection,
    /// Idle disconnect task configuration.
    pub idle: IdleConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// IPC transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IpcSection {
    /// Request timeout in milliseconds (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Cluster session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Upper bound on one connection attempt in seconds (default: 30).
    /// An attempt that takes longer fails and the cluster enters Error.
    #[serde(default = "default_activation_timeout_secs")]
    pub activation_timeout_secs: u64,
}

/// Watch multiplexing and stream recovery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    /// Queued events per (cluster, kind) before the queue is discarded and
    /// subscribers reload (default: 1024).
    #[serde(default = "default_backlog_threshold")]
    pub backlog_threshold: usize,
    /// Consecutive stream failures before a kind is marked unavailable (default: 5).
    #[serde(default = "default_max_resync_attempts")]
    pub max_resync_attempts: u32,
    /// Delay before the first stream restart in milliseconds (default: 500).
    #[serde(default = "default_resync_base_delay_ms")]
    pub resync_base_delay_ms: u64,
    /// Upper bound on the restart delay in milliseconds (default: 30000).
    #[serde(default = "default_resync_max_delay_ms")]
    pub resync_max_delay_ms: u64,
}

/// Idle disconnect task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IdleConfig {
    /// Enable the idle disconnect task (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Seconds a Ready cluster may go without frames before it is
    /// disconnected (default: 600).
    #[serde(default = "default_disconnect_after_secs")]
    pub disconnect_after_secs: u64,
    /// Check interval in seconds (default: 60).
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for the HTTP server (default: 127.0.0.1:9464).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (default: "info").
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Include the event target in log lines (default: true).
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

// Default value functions
fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_activation_timeout_secs() -> u64 {
    30
}

fn default_backlog_threshold() -> usize {
    link_watch::DEFAULT_BACKLOG_THRESHOLD
}

fn default_max_resync_attempts() -> u32 {
    ResyncPolicy::DEFAULT_MAX_ATTEMPTS
}

fn default_resync_base_delay_ms() -> u64 {
    500
}

fn default_resync_max_delay_ms() -> u64 {
    30_000
}

fn default_disconnect_after_secs() -> u64 {
    600 // 10 minutes
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_http_bind() -> String {
    "127.0.0.1:9464".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for IpcSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            activation_timeout_secs: default_activation_timeout_secs(),
        }
    }
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            backlog_threshold: default_backlog_threshold(),
            max_resync_attempts: default_max_resync_attempts(),
            resync_base_delay_ms: default_resync_base_delay_ms(),
            resync_max_delay_ms: default_resync_max_delay_ms(),
        }
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            disconnect_after_secs: default_disconnect_after_secs(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            with_target: default_with_target(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Endpoint configuration for the owning process.
    pub fn ipc_config(&self) -> IpcConfig {
        IpcConfig::default().with_request_timeout(Duration::from_millis(self.ipc.request_timeout_ms))
    }

    /// Stream recovery limits.
    pub fn resync_policy(&self) -> ResyncPolicy {
        ResyncPolicy {
            max_attempts: self.watch.max_resync_attempts,
            base_delay: Duration::from_millis(self.watch.resync_base_delay_ms),
            max_delay: Duration::from_millis(self.watch.resync_max_delay_ms),
        }
    }

    /// Settings shared by every cluster session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            activation_timeout: Duration::from_secs(self.session.activation_timeout_secs),
            resync: self.resync_policy(),
        }
    }

    /// Multiplexer configuration for display processes.
    pub fn multiplexer_config(&self) -> MultiplexerConfig {
        MultiplexerConfig::default().with_backlog_threshold(self.watch.backlog_threshold)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
