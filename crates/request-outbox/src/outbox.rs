//! Outbox facade wiring the queue, executors and orchestrator together.

use crate::{
    rehydrate, ConnectivityMonitor, DirectRequest, EventBus, Executor, HttpTransport,
    JsonFileSnapshotStore, Orchestrator, OutboxConfig, OutboxEvent, OutboxResult, Paths,
    PendingRequest, QueueStore, ReplayConfig, RequestDescriptor, RetryPolicy, SnapshotStore,
    Transport, TransportError, DEFAULT_EVENT_CAPACITY,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// Builder for [`RequestOutbox`].
pub struct RequestOutboxBuilder {
    transport: Arc<dyn Transport>,
    connectivity: ConnectivityMonitor,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    retry: RetryPolicy,
    replay: ReplayConfig,
    event_capacity: usize,
}

impl RequestOutboxBuilder {
    /// Persist the queue to this store on every mutation.
    pub fn snapshots(mut self, snapshots: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn replay_config(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn build(self) -> RequestOutbox {
        let bus = EventBus::new(self.event_capacity);
        let queue = Arc::new(match &self.snapshots {
            Some(snapshots) => QueueStore::with_snapshots(bus.clone(), snapshots.clone()),
            None => QueueStore::new(bus.clone()),
        });
        let executor = Executor::new(
            self.transport,
            self.connectivity.clone(),
            bus.clone(),
            queue.clone(),
        )
        .with_retry_policy(self.retry);
        let orchestrator = Orchestrator::new(
            executor.clone(),
            queue.clone(),
            bus.clone(),
            self.connectivity.clone(),
            self.replay,
        );

        RequestOutbox {
            bus,
            connectivity: self.connectivity,
            queue,
            executor,
            orchestrator,
            snapshots: self.snapshots,
        }
    }
}

/// Connectivity-aware request outbox.
///
/// Direct requests retry in-process until they settle. Queued requests are
/// kept in the queue until a replay sees them succeed or fail for an
/// application reason. Call [`RequestOutbox::start`] to begin replaying.
pub struct RequestOutbox {
    bus: EventBus,
    connectivity: ConnectivityMonitor,
    queue: Arc<QueueStore>,
    executor: Executor,
    orchestrator: Orchestrator,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl RequestOutbox {
    /// In-memory outbox with default policies.
    pub fn new(transport: Arc<dyn Transport>, connectivity: ConnectivityMonitor) -> Self {
        Self::builder(transport, connectivity).build()
    }

    pub fn builder(
        transport: Arc<dyn Transport>,
        connectivity: ConnectivityMonitor,
    ) -> RequestOutboxBuilder {
        RequestOutboxBuilder {
            transport,
            connectivity,
            snapshots: None,
            retry: RetryPolicy::default(),
            replay: ReplayConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Outbox over HTTP with a JSON snapshot file, as configured.
    pub fn from_config(
        config: &OutboxConfig,
        paths: &Paths,
        connectivity: ConnectivityMonitor,
    ) -> OutboxResult<Self> {
        let transport = HttpTransport::new(config.request_timeout())?;
        let snapshots = JsonFileSnapshotStore::new(config.snapshot_path(paths));

        Ok(Self::builder(Arc::new(transport), connectivity)
            .snapshots(Arc::new(snapshots))
            .retry_policy(config.retry_policy())
            .replay_config(config.replay_config())
            .event_capacity(config.event_channel_capacity)
            .build())
    }

    /// Start the replay orchestrator. Must be called within a Tokio runtime.
    pub fn start(&self) {
        self.orchestrator.start();
    }

    /// Append `entry` to the queue and request a replay.
    ///
    /// Returns the snapshot error when the entry could not be made durable;
    /// nothing is queued and no replay is requested in that case.
    pub async fn queue_request(&self, entry: PendingRequest) -> OutboxResult<()> {
        info!(
            request_id = %entry.id,
            base_type = %entry.base_type,
            "Queueing request"
        );
        self.queue.enqueue(entry).await?;
        self.bus.publish(OutboxEvent::ExecuteQueue);
        Ok(())
    }

    /// Run an ad-hoc call with direct semantics.
    pub async fn execute_direct<P, F, Fut>(
        &self,
        call: F,
        request: &DirectRequest<P>,
    ) -> Result<Value, TransportError>
    where
        P: Clone,
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<Value, TransportError>>,
    {
        self.executor.execute_direct(call, request).await
    }

    /// Run a descriptor through the transport with direct semantics.
    pub async fn send(
        &self,
        request: &DirectRequest<RequestDescriptor>,
    ) -> Result<Value, TransportError> {
        self.executor.send(request).await
    }

    /// Restore the persisted queue and announce `REHYDRATE`.
    ///
    /// Without a snapshot store the current contents are re-announced as is.
    pub async fn rehydrate(&self) -> OutboxResult<usize> {
        match &self.snapshots {
            Some(snapshots) => rehydrate(&self.queue, snapshots.as_ref()).await,
            None => {
                let current = self.queue.snapshot().await;
                Ok(self.queue.restore(current).await)
            }
        }
    }

    /// Subscribe to outcome and queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.bus.subscribe()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn queue(&self) -> &Arc<QueueStore> {
        &self.queue
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Resolve once no replay pass or queued worker is running.
    pub async fn wait_idle(&self) {
        self.orchestrator.wait_idle().await;
    }

    /// Stop reacting to triggers. Running workers finish on their own.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
