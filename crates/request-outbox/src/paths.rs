//! File system paths for the outbox.

use crate::{OutboxError, OutboxResult};
use std::path::PathBuf;

/// Name of the base directory under the user's home.
const BASE_DIR_NAME: &str = ".request-outbox";

/// Resolves where the outbox keeps its files.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.request-outbox)
    base_dir: PathBuf,
}

impl Paths {
    /// Paths rooted at `~/.request-outbox`.
    pub fn new() -> OutboxResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| OutboxError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Paths rooted at a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// ~/.request-outbox/config.json
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// ~/.request-outbox/queue.json
    pub fn snapshot_file(&self) -> PathBuf {
        self.base_dir.join("queue.json")
    }

    /// ~/.request-outbox/logs
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// ~/.request-outbox/logs/outbox.jsonl
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("outbox.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> OutboxResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
