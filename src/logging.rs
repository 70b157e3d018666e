//! Tracing setup for applications embedding the client.
//!
//! The library itself only emits `tracing` events. `init_tracing` installs a
//! file-backed global subscriber when `[logging].enabled` is set or
//! `OVSDB_TRACE` asks for it. Environment variables win over the config:
//!
//! | Variable | Effect |
//! |---|---|
//! | `OVSDB_TRACE` | `0` disables output, any other value enables it |
//! | `OVSDB_TRACE_FILE` | log file, overrides `[logging].file` |
//! | `OVSDB_TRACE_LEVEL` | filter directive, overrides `[logging].level` |
//! | `OVSDB_TRACE_JSON` | `1` for JSON lines, overrides `[logging].format` |

use std::env;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;

use crate::config::LoggingConfig;

static TRACE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Effective trace output settings after environment overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceSettings {
    pub file: String,
    pub level: String,
    pub json: bool,
}

impl TraceSettings {
    /// Combine `config` with overrides looked up through `var`. Returns
    /// `None` when tracing is disabled.
    pub fn resolve<F>(config: &LoggingConfig, var: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = var("OVSDB_TRACE").map_or(config.enabled, |v| v != "0");
        if !enabled {
            return None;
        }
        Some(TraceSettings {
            file: var("OVSDB_TRACE_FILE").unwrap_or_else(|| config.file.clone()),
            level: var("OVSDB_TRACE_LEVEL").unwrap_or_else(|| config.level.clone()),
            json: var("OVSDB_TRACE_JSON").map_or(config.format == "json", |v| v != "0"),
        })
    }

    /// Resolve against the process environment.
    pub fn from_env(config: &LoggingConfig) -> Option<Self> {
        Self::resolve(config, |key| env::var(key).ok())
    }
}

/// Install the global subscriber. Returns whether this call installed it;
/// later calls, and calls with tracing disabled, do nothing.
pub fn init_tracing(logging_config: &LoggingConfig) -> bool {
    if TRACE_GUARD.get().is_some() {
        return false;
    }
    let Some(settings) = TraceSettings::from_env(logging_config) else {
        return false;
    };

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("ERROR: Unable to open trace file '{}': {e}", settings.file);
            return false;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    if TRACE_GUARD.set(guard).is_err() {
        return false;
    }

    let filter = tracing_subscriber::EnvFilter::try_new(&settings.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let base = || {
        tracing_subscriber::fmt()
            .with_env_filter(filter.clone())
            .with_ansi(false)
            .with_thread_names(true)
            .with_writer(non_blocking.clone())
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
    };

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if settings.json {
        Box::new(base().json().finish())
    } else {
        Box::new(base().compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
