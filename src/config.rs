//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - ovsdb.toml (default configuration)
//! - ovsdb.local.toml (git-ignored local overrides)
//! - Environment variables (OVSDB_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # ovsdb.toml
//! [connection]
//! address = "10.0.0.5:6640"
//! database = "Open_vSwitch"
//! request_timeout_ms = 5000
//!
//! [monitor.default_select]
//! initial = true
//! modify = false
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! OVSDB_CONNECTION__ADDRESS=10.0.0.1:6640
//! OVSDB_LOGGING__FORMAT=json
//! ```

use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::monitor::MonitorSelect;
use crate::protocol::{TransportOptions, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_MS, MAX_MESSAGE_SIZE};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection to the OVSDB server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `host:port` of the server
    pub address: String,

    /// Database the client works against
    pub database: String,

    /// Per-call timeout in milliseconds (0 = wait forever)
    pub request_timeout_ms: u64,

    /// Largest inbound JSON message in bytes
    pub max_message_size: usize,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl ConnectionConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: self.request_timeout(),
            max_message_size: self.max_message_size,
        }
    }
}

/// Monitor defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Change kinds requested when a caller does not say otherwise
    pub default_select: MonitorSelect,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Write trace output even without `OVSDB_TRACE`
    pub enabled: bool,

    /// Trace output file
    pub file: String,
}

fn default_address() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}
fn default_database() -> String {
    "Open_vSwitch".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_file() -> String {
    "ovsdb_trace.log".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. ovsdb.toml (base configuration)
    /// 2. ovsdb.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (OVSDB_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("ovsdb.toml"))
            .merge(Toml::file("ovsdb.local.toml"))
            .merge(Env::prefixed("OVSDB_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("OVSDB_").split("__"))
            .extract()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            address: default_address(),
            database: default_database(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_message_size: MAX_MESSAGE_SIZE,
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            enabled: false,
            file: default_log_file(),
        }
    }
}
