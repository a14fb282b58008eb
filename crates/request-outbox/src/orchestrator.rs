//! Replay orchestration.
//!
//! A supervisor task listens for three triggers and turns each into a replay
//! pass over the queue:
//!
//! - `EXECUTE_QUEUE` on the event bus (raised after every enqueue),
//! - every ONLINE connectivity signal,
//! - the first `REHYDRATE` of the orchestrator's lifetime only; later
//!   rehydrations are ignored, including after a restart.
//!
//! A pass snapshots the queue and spawns one queued executor per entry. Each
//! trigger kind keeps a single pass slot: a newer trigger aborts an older pass
//! of the same kind that has not finished selecting yet. Workers that were
//! already spawned are never aborted.

use crate::claims::{InFlightClaim, InFlightClaims};
use crate::{
    ConnectivityEvent, ConnectivityMonitor, EventBus, Executor, OutboxEvent, PendingRequest,
    QueueStore, RequestId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What caused a replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    ExplicitReplay,
    ConnectivityRestored,
    PersistenceRestored,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExplicitReplay => "explicit_replay",
            Self::ConnectivityRestored => "connectivity_restored",
            Self::PersistenceRestored => "persistence_restored",
        };
        f.write_str(name)
    }
}

/// Replay behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Skip queued entries that already have a running worker.
    ///
    /// Entries sharing an id are still claimed separately. When disabled,
    /// overlapping triggers may run the same entry twice concurrently.
    pub dedupe_in_flight: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dedupe_in_flight: true,
        }
    }
}

/// Counts running passes and workers; decrements on drop.
struct ActivityGuard {
    active: watch::Sender<usize>,
}

impl ActivityGuard {
    fn new(active: &watch::Sender<usize>) -> Self {
        active.send_modify(|n| *n += 1);
        Self {
            active: active.clone(),
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct Inner {
    executor: Executor,
    queue: Arc<QueueStore>,
    config: ReplayConfig,
    claims: InFlightClaims,
    /// Passes plus workers currently alive.
    active: watch::Sender<usize>,
    workers: Arc<AtomicUsize>,
    passes: Mutex<HashMap<TriggerKind, JoinHandle<()>>>,
    completed: Mutex<HashMap<TriggerKind, u64>>,
    /// Set by the first REHYDRATE; survives restarts.
    persistence_replayed: AtomicBool,
}

impl Inner {
    fn trigger(self: &Arc<Self>, kind: TriggerKind) {
        let guard = ActivityGuard::new(&self.active);
        let inner = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            inner.run_pass(kind).await;
        });

        let previous = self.passes.lock().insert(kind, handle);
        if let Some(previous) = previous {
            if !previous.is_finished() {
                debug!(trigger = %kind, "Superseding pending replay pass");
                previous.abort();
            }
        }
    }

    async fn run_pass(self: &Arc<Self>, kind: TriggerKind) {
        let entries = self.select_entries().await;
        // Nothing below awaits, so a pass that got this far always finishes
        // spawning its workers.
        let spawned = self.spawn_workers(entries);
        *self.completed.lock().entry(kind).or_insert(0) += 1;

        info!(trigger = %kind, spawned, "Replay pass dispatched");
    }

    async fn select_entries(&self) -> Vec<(PendingRequest, Option<InFlightClaim>)> {
        if self.config.dedupe_in_flight {
            self.queue
                .claim_entries(&self.claims)
                .await
                .into_iter()
                .map(|(entry, claim)| (entry, Some(claim)))
                .collect()
        } else {
            self.queue
                .snapshot()
                .await
                .into_iter()
                .map(|entry| (entry, None))
                .collect()
        }
    }

    fn spawn_workers(
        self: &Arc<Self>,
        entries: Vec<(PendingRequest, Option<InFlightClaim>)>,
    ) -> usize {
        let spawned = entries.len();

        for (entry, claim) in entries {
            let guard = ActivityGuard::new(&self.active);
            let inner = self.clone();
            let workers = self.workers.clone();
            workers.fetch_add(1, Ordering::SeqCst);

            tokio::spawn(async move {
                let _guard = guard;
                let _ = inner.executor.run_queued(&entry, claim).await;
                workers.fetch_sub(1, Ordering::SeqCst);
            });
        }

        spawned
    }
}

/// Supervisor that replays the queue on every trigger.
pub struct Orchestrator {
    inner: Arc<Inner>,
    bus: EventBus,
    connectivity: ConnectivityMonitor,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        executor: Executor,
        queue: Arc<QueueStore>,
        bus: EventBus,
        connectivity: ConnectivityMonitor,
        config: ReplayConfig,
    ) -> Self {
        let (active, _) = watch::channel(0usize);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                executor,
                queue,
                config,
                claims: InFlightClaims::default(),
                active,
                workers: Arc::new(AtomicUsize::new(0)),
                passes: Mutex::new(HashMap::new()),
                completed: Mutex::new(HashMap::new()),
                persistence_replayed: AtomicBool::new(false),
            }),
            bus,
            connectivity,
            shutdown,
            supervisor: Mutex::new(None),
        }
    }

    /// Start listening for triggers.
    ///
    /// Subscriptions are taken before this returns, so any trigger raised
    /// afterwards is seen. Calling it again while running is a no-op. Must be
    /// called from within a Tokio runtime.
    pub fn start(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Orchestrator already running");
            return;
        }

        self.shutdown.send_replace(false);
        let events = self.bus.subscribe();
        let signals = self.connectivity.subscribe();
        let shutdown = self.shutdown.subscribe();
        let inner = self.inner.clone();
        let connectivity = self.connectivity.clone();

        *supervisor = Some(tokio::spawn(supervise(
            inner,
            connectivity,
            events,
            signals,
            shutdown,
        )));
        info!(
            dedupe_in_flight = self.inner.config.dedupe_in_flight,
            "Orchestrator started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Raise a trigger by hand. Supersedes a pending pass of the same kind.
    pub fn trigger(&self, kind: TriggerKind) {
        self.inner.trigger(kind);
    }

    /// Snapshot the queue and spawn workers right now, outside any trigger
    /// slot. Returns the number of workers spawned.
    pub async fn replay_all(&self) -> usize {
        let entries = self.inner.select_entries().await;
        self.inner.spawn_workers(entries)
    }

    /// Resolve once no pass and no worker is running.
    pub async fn wait_idle(&self) {
        let mut active = self.inner.active.subscribe();
        let _ = active.wait_for(|n| *n == 0).await;
    }

    /// Number of queued executors currently running.
    pub fn active_workers(&self) -> usize {
        self.inner.workers.load(Ordering::SeqCst)
    }

    /// Whether a claimed worker is currently running `id`.
    ///
    /// Always false when in-flight dedupe is disabled.
    pub fn is_in_flight(&self, id: &RequestId) -> bool {
        self.inner.claims.is_claimed(id)
    }

    /// Number of queued entries currently claimed by workers.
    pub fn claimed_count(&self) -> usize {
        self.inner.claims.len()
    }

    /// Number of passes of `kind` that reached worker dispatch.
    pub fn completed_passes(&self, kind: TriggerKind) -> u64 {
        self.inner
            .completed
            .lock()
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Stop the supervisor and abort passes still selecting.
    ///
    /// Spawned workers keep running to completion.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        for (_, pass) in self.inner.passes.lock().drain() {
            pass.abort();
        }

        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("Orchestrator stopped");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    connectivity: ConnectivityMonitor,
    mut events: broadcast::Receiver<OutboxEvent>,
    mut signals: broadcast::Receiver<ConnectivityEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(OutboxEvent::ExecuteQueue) => inner.trigger(TriggerKind::ExplicitReplay),
                Ok(OutboxEvent::Rehydrate { count }) => {
                    if inner.persistence_replayed.swap(true, Ordering::SeqCst) {
                        debug!(count, "Ignoring repeated rehydration");
                    } else {
                        inner.trigger(TriggerKind::PersistenceRestored);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Orchestrator lagged behind the event bus, replaying");
                    inner.trigger(TriggerKind::ExplicitReplay);
                }
                Err(RecvError::Closed) => break,
            },
            signal = signals.recv() => match signal {
                Ok(ConnectivityEvent::Online) => inner.trigger(TriggerKind::ConnectivityRestored),
                Ok(ConnectivityEvent::Offline) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Orchestrator lagged behind connectivity signals");
                    if !connectivity.is_offline() {
                        inner.trigger(TriggerKind::ConnectivityRestored);
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!("Orchestrator supervisor exited");
}
