//! Connectivity-aware request execution with a durable replay queue.
//!
//! This crate provides:
//! - Executor: direct requests retried in-process, queued requests run once
//! - QueueStore: ordered pending requests, written through to a snapshot store
//! - Orchestrator: replays the queue on EXECUTE_QUEUE, ONLINE and first REHYDRATE
//! - RequestOutbox: facade wiring the pieces together

mod claims;
mod config;
mod connectivity;
mod error;
mod event;
mod executor;
mod orchestrator;
mod outbox;
mod paths;
mod persistence;
mod queue;
mod request;
mod transport;

pub use config::{OutboxConfig, DEFAULT_LOG_LEVEL, DEFAULT_PROBE_URL, LOG_LEVEL_ENV};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, ConnectivityStatus};
pub use error::{OutboxError, OutboxResult};
pub use event::{
    error_event_name, success_event_name, EventBus, Outcome, OutboxEvent,
    DEFAULT_EVENT_CAPACITY, DEQUEUE_REQUEST, EXECUTE_QUEUE, QUEUE_REQUEST, REHYDRATE,
};
pub use executor::{Executor, RetryPolicy};
pub use orchestrator::{Orchestrator, ReplayConfig, TriggerKind};
pub use outbox::{RequestOutbox, RequestOutboxBuilder};
pub use paths::Paths;
pub use persistence::{rehydrate, JsonFileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use queue::QueueStore;
pub use request::{DirectRequest, PendingRequest, RequestDescriptor, RequestId};
pub use transport::{HttpTransport, Transport, TransportError};
