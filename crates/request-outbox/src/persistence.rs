//! Queue snapshots and rehydration.
//!
//! The queue is persisted as a whole: every mutation writes the full ordered
//! collection, and startup restores it in one step before announcing
//! `REHYDRATE`.

use crate::{OutboxError, OutboxResult, PendingRequest, QueueStore};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Current snapshot file format.
const SNAPSHOT_VERSION: u32 = 1;

/// Storage for whole-queue snapshots.
pub trait SnapshotStore: Send + Sync {
    /// Load the last saved snapshot, or `None` when nothing was ever saved.
    fn load(&self) -> OutboxResult<Option<Vec<PendingRequest>>>;

    /// Replace the stored snapshot.
    fn save(&self, entries: &[PendingRequest]) -> OutboxResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: Vec<PendingRequest>,
}

/// Snapshot kept in a JSON file, replaced atomically via rename.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn load(&self) -> OutboxResult<Option<Vec<PendingRequest>>> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No queue snapshot on disk");
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let snapshot: SnapshotFile = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(OutboxError::Persistence(format!(
                "unsupported snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }

        debug!(
            path = %self.path.display(),
            count = snapshot.entries.len(),
            saved_at = %snapshot.saved_at,
            "Loaded queue snapshot"
        );
        Ok(Some(snapshot.entries))
    }

    fn save(&self, entries: &[PendingRequest]) -> OutboxResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            entries: entries.to_vec(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;

        let temp = self.temp_path();
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// In-memory snapshot store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshot: Mutex<Option<Vec<PendingRequest>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with an existing snapshot.
    pub fn with_entries(entries: Vec<PendingRequest>) -> Self {
        Self {
            snapshot: Mutex::new(Some(entries)),
        }
    }

    /// The last saved snapshot.
    pub fn entries(&self) -> Option<Vec<PendingRequest>> {
        self.snapshot.lock().clone()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> OutboxResult<Option<Vec<PendingRequest>>> {
        Ok(self.snapshot.lock().clone())
    }

    fn save(&self, entries: &[PendingRequest]) -> OutboxResult<()> {
        *self.snapshot.lock() = Some(entries.to_vec());
        Ok(())
    }
}

/// Load the persisted snapshot into `queue` and announce `REHYDRATE`.
///
/// A missing snapshot restores an empty queue. Returns the number of entries
/// restored.
pub async fn rehydrate(queue: &QueueStore, snapshots: &dyn SnapshotStore) -> OutboxResult<usize> {
    let entries = snapshots.load()?.unwrap_or_default();
    let count = queue.restore(entries).await;
    info!(count, "Queue rehydrated");
    Ok(count)
}
