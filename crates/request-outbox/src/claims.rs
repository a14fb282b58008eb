//! In-flight claims keyed by queued entry.

use crate::RequestId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// One queued entry: its id plus the queue's sequence number for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EntryKey {
    id: RequestId,
    seq: u64,
}

/// Set of queued entries that currently have a running queued executor.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlightClaims {
    keys: Arc<Mutex<HashSet<EntryKey>>>,
}

impl InFlightClaims {
    /// Claim entry `seq` of `id`, or `None` when another worker already holds it.
    pub(crate) fn try_claim(&self, id: &RequestId, seq: u64) -> Option<InFlightClaim> {
        let key = EntryKey {
            id: id.clone(),
            seq,
        };
        if !self.keys.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            key,
            keys: self.keys.clone(),
        })
    }

    /// Whether any entry with this id is claimed.
    pub(crate) fn is_claimed(&self, id: &RequestId) -> bool {
        self.keys.lock().iter().any(|key| &key.id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.lock().len()
    }
}

/// Released on drop.
#[derive(Debug)]
pub(crate) struct InFlightClaim {
    key: EntryKey,
    keys: Arc<Mutex<HashSet<EntryKey>>>,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}
