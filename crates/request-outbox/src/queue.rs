//! Ordered store of pending requests.

use crate::claims::{InFlightClaim, InFlightClaims};
use crate::{EventBus, OutboxEvent, OutboxResult, PendingRequest, RequestId, SnapshotStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A queued request plus the sequence number that tells same-id entries apart.
struct Slot {
    seq: u64,
    request: PendingRequest,
}

#[derive(Default)]
struct Entries {
    slots: Vec<Slot>,
    next_seq: u64,
}

impl Entries {
    fn push(&mut self, request: PendingRequest) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(Slot { seq, request });
    }

    fn requests(&self) -> Vec<PendingRequest> {
        self.slots.iter().map(|slot| slot.request.clone()).collect()
    }
}

/// FIFO collection of queued requests shared by every executor.
///
/// Mutations take the write lock for their whole duration, so enqueue and
/// dequeue never interleave. Each mutation is announced on the bus and
/// written through to the snapshot store, if one is configured. An enqueue is
/// only applied once its snapshot is written. Readers get a point-in-time copy
/// that may already be stale; that is fine because dequeueing an absent id is
/// a no-op.
pub struct QueueStore {
    entries: RwLock<Entries>,
    bus: EventBus,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl QueueStore {
    /// Create an in-memory queue.
    pub fn new(bus: EventBus) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            bus,
            snapshots: None,
        }
    }

    /// Create a queue that persists every mutation.
    pub fn with_snapshots(bus: EventBus, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            bus,
            snapshots: Some(snapshots),
        }
    }

    /// Append an entry. Existing entries with the same id are kept.
    ///
    /// Fails without touching the queue when the snapshot cannot be written.
    pub async fn enqueue(&self, entry: PendingRequest) -> OutboxResult<()> {
        let mut entries = self.entries.write().await;
        if let Some(snapshots) = &self.snapshots {
            let mut next = entries.requests();
            next.push(entry.clone());
            snapshots.save(&next)?;
        }
        entries.push(entry.clone());

        debug!(
            request_id = %entry.id,
            base_type = %entry.base_type,
            queued = entries.slots.len(),
            "Enqueued request"
        );

        self.bus.publish(OutboxEvent::QueueRequest {
            id: entry.id.clone(),
            related: entry,
        });
        Ok(())
    }

    /// Remove every entry with this id. Returns how many were removed.
    pub async fn dequeue_by_id(&self, id: &RequestId) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.slots.len();
        entries.slots.retain(|slot| &slot.request.id != id);
        let removed = before - entries.slots.len();

        if removed > 0 {
            self.persist(&entries.requests());
            debug!(request_id = %id, removed, "Dequeued request");
        }

        self.bus
            .publish(OutboxEvent::DequeueRequest { id: id.clone() });
        removed
    }

    /// Copy of the current queue in insertion order.
    pub async fn snapshot(&self) -> Vec<PendingRequest> {
        self.entries.read().await.requests()
    }

    /// Claim every queued entry that no worker holds yet, in insertion order.
    ///
    /// Claims are taken under the read lock, so an entry a worker has already
    /// dequeued can never be claimed again from a stale copy.
    pub(crate) async fn claim_entries(
        &self,
        claims: &InFlightClaims,
    ) -> Vec<(PendingRequest, InFlightClaim)> {
        let entries = self.entries.read().await;
        let mut claimed = Vec::with_capacity(entries.slots.len());

        for slot in &entries.slots {
            match claims.try_claim(&slot.request.id, slot.seq) {
                Some(claim) => claimed.push((slot.request.clone(), claim)),
                None => {
                    debug!(request_id = %slot.request.id, "Request already in flight, skipping");
                }
            }
        }

        claimed
    }

    pub async fn contains(&self, id: &RequestId) -> bool {
        self.entries
            .read()
            .await
            .slots
            .iter()
            .any(|slot| &slot.request.id == id)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.slots.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.slots.is_empty()
    }

    /// Replace the whole queue with a restored snapshot and announce it.
    ///
    /// The restored collection is not written back to the snapshot store.
    pub async fn restore(&self, restored: Vec<PendingRequest>) -> usize {
        let mut entries = self.entries.write().await;
        entries.slots.clear();
        for request in restored {
            entries.push(request);
        }
        let count = entries.slots.len();

        info!(count, "Restored queue from snapshot");
        self.bus.publish(OutboxEvent::Rehydrate { count });
        count
    }

    fn persist(&self, entries: &[PendingRequest]) {
        let Some(snapshots) = &self.snapshots else {
            return;
        };

        // Dequeues stay applied in memory; the next mutation rewrites the file.
        if let Err(e) = snapshots.save(entries) {
            warn!(error = %e, count = entries.len(), "Failed to persist queue snapshot");
        }
    }
}
