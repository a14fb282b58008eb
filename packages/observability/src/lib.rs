//! # Observability
//!
//! Logging setup for the request outbox.
//!
//! Binaries call [`init`] or [`init_with_config`] once at startup and use the
//! `tracing` macros everywhere else. Every event is written as one JSON line
//! to `~/.request-outbox/logs/outbox.jsonl` unless another path is configured,
//! and optionally mirrored to stderr in compact form.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "request-outbox".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! })?;
//! tracing::info!("ready");
//! ```
//!
//! `RUST_LOG` overrides the configured level for both outputs.

mod file;
mod json_layer;

pub use file::LogFile;
pub use json_layer::{JsonLayer, LogLine};

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Errors raised while installing the subscriber.
#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("Could not determine home directory")]
    NoHomeDir,

    #[error("Failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A global subscriber is already installed")]
    AlreadyInitialized,
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written to every line as `service`.
    pub service_name: String,

    /// Default filter, e.g. "info" or "request_outbox=debug".
    /// `RUST_LOG` takes precedence.
    pub default_level: String,

    /// Log file location. Defaults to [`default_log_path`].
    pub log_path: Option<PathBuf>,

    /// Mirror events to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "request-outbox".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// `~/.request-outbox/logs/outbox.jsonl`
pub fn default_log_path() -> Result<PathBuf, ObservabilityError> {
    let home = dirs::home_dir().ok_or(ObservabilityError::NoHomeDir)?;
    Ok(home
        .join(".request-outbox")
        .join("logs")
        .join("outbox.jsonl"))
}

/// Install the subscriber with default settings for `service_name`.
pub fn init(service_name: &str) -> Result<PathBuf, ObservabilityError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Install the global subscriber. Returns the log file path in use.
pub fn init_with_config(config: LogConfig) -> Result<PathBuf, ObservabilityError> {
    let log_path = match config.log_path.clone() {
        Some(path) => path,
        None => default_log_path()?,
    };
    let log_file = LogFile::open(&log_path).map_err(|source| ObservabilityError::LogFile {
        path: log_path.clone(),
        source,
    })?;

    let json_layer = JsonLayer::new(config.service_name.clone(), log_file)
        .with_filter(env_filter(&config.default_level));

    let stderr_layer = config.also_stderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| ObservabilityError::AlreadyInitialized)?;

    tracing::info!(log_path = %log_path.display(), "Logging initialized");
    Ok(log_path)
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
