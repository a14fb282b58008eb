//! Outbox configuration.

use crate::{OutboxError, OutboxResult, Paths, ReplayConfig, RetryPolicy, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding the log level.
pub const LOG_LEVEL_ENV: &str = "REQUEST_OUTBOX_LOG_LEVEL";

/// Endpoint probed to decide whether the network is reachable.
pub const DEFAULT_PROBE_URL: &str = "https://clients3.google.com/generate_204";

const DEFAULT_PROBE_INTERVAL_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Outbox configuration, stored as `config.json` under the base directory.
///
/// Every field has a default, so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Snapshot location. Defaults to `queue.json` in the base directory.
    pub snapshot_file: Option<PathBuf>,
    pub probe_url: String,
    pub probe_interval_ms: u64,
    /// Per-request timeout of the HTTP transport.
    pub request_timeout_secs: u64,
    pub event_channel_capacity: usize,
    /// Skip replaying entries that already have a running worker.
    pub dedupe_in_flight: bool,
    /// Attempt cap for direct requests. Unset retries forever.
    pub direct_max_attempts: Option<u32>,
    /// Zero disables backoff between direct retries.
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            snapshot_file: None,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            event_channel_capacity: DEFAULT_EVENT_CAPACITY,
            dedupe_in_flight: true,
            direct_max_attempts: None,
            backoff_base_ms: 0,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl OutboxConfig {
    /// Defaults with environment overrides applied.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load `config.json` from `paths`, falling back to defaults when absent.
    pub fn load(paths: &Paths) -> OutboxResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };
        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Reject values the outbox cannot run with.
    pub fn validate(&self) -> OutboxResult<()> {
        if self.probe_interval_ms == 0 {
            return Err(OutboxError::Config(
                "probe_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(OutboxError::Config(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.direct_max_attempts == Some(0) {
            return Err(OutboxError::Config(
                "direct_max_attempts must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> OutboxResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OutboxConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> OutboxResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var(LOG_LEVEL_ENV) {
            self.log_level = log_level;
        }
    }

    /// Where the queue snapshot lives.
    pub fn snapshot_path(&self, paths: &Paths) -> PathBuf {
        self.snapshot_file
            .clone()
            .unwrap_or_else(|| paths.snapshot_file())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.direct_max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn replay_config(&self) -> ReplayConfig {
        ReplayConfig {
            dedupe_in_flight: self.dedupe_in_flight,
        }
    }
}
