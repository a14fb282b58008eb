//! End-to-end replay behaviour through the `RequestOutbox` facade.

use async_trait::async_trait;
use parking_lot::Mutex;
use request_outbox::{
    ConnectivityEvent, ConnectivityMonitor, JsonFileSnapshotStore, MemorySnapshotStore,
    OutboxEvent, OutboxResult, PendingRequest, ReplayConfig, RequestDescriptor, RequestId,
    RequestOutbox, SnapshotStore, Transport, TransportError, TriggerKind,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

/// Transport answering per URL, optionally holding every call until released.
struct RoutedTransport {
    routes: Mutex<HashMap<String, Result<Value, TransportError>>>,
    calls: Mutex<HashMap<String, usize>>,
    payloads: Mutex<Vec<Value>>,
    gate: Option<Semaphore>,
}

impl RoutedTransport {
    fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            payloads: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    fn route(self, url: &str, result: Result<Value, TransportError>) -> Self {
        self.routes.lock().insert(url.to_string(), result);
        self
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1_000);
        }
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }

    fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().clone()
    }
}

#[async_trait]
impl Transport for RoutedTransport {
    async fn perform(&self, descriptor: &RequestDescriptor) -> Result<Value, TransportError> {
        *self.calls.lock().entry(descriptor.url.clone()).or_insert(0) += 1;
        if let Some(payload) = &descriptor.payload {
            self.payloads.lock().push(payload.clone());
        }
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.expect("gate closed");
        }
        self.routes
            .lock()
            .get(&descriptor.url)
            .cloned()
            .unwrap_or_else(|| Ok(json!({})))
    }
}

fn entry(id: &str, base_type: &str, url: &str) -> PendingRequest {
    PendingRequest::new(id, base_type, RequestDescriptor::new("POST", url))
}

fn drain<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

fn names(events: &[OutboxEvent]) -> Vec<String> {
    events.iter().map(|e| e.name()).collect()
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn until_queue_empty(outbox: &RequestOutbox) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !outbox.queue().is_empty().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not drain in time");
}

#[tokio::test]
async fn test_connectivity_restored_settles_every_entry() {
    let transport = Arc::new(
        RoutedTransport::new()
            .route("https://api.test/a", Ok(json!({ "saved": true })))
            .route(
                "https://api.test/b",
                Err(TransportError::HttpStatus {
                    status: 422,
                    status_text: "Unprocessable Entity".to_string(),
                }),
            ),
    );
    let outbox = RequestOutbox::new(transport.clone(), ConnectivityMonitor::offline());
    outbox.queue().enqueue(entry("1", "A", "https://api.test/a")).await.unwrap();
    outbox.queue().enqueue(entry("2", "B", "https://api.test/b")).await.unwrap();

    let mut events = outbox.subscribe();
    outbox.start();
    outbox.connectivity().set_online();

    until_queue_empty(&outbox).await;
    outbox.wait_idle().await;

    let events = drain(&mut events);
    let names = names(&events);
    assert_eq!(names.iter().filter(|n| *n == "A_SUCCESS").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "B_ERROR").count(), 1);
    assert!(events.contains(&OutboxEvent::DequeueRequest {
        id: RequestId::from("1")
    }));
    assert!(events.contains(&OutboxEvent::DequeueRequest {
        id: RequestId::from("2")
    }));

    let failure = events
        .iter()
        .find(|e| e.name() == "B_ERROR")
        .map(|e| e.to_wire())
        .unwrap();
    assert_eq!(failure["error"], "Unprocessable Entity");

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_network_failure_leaves_entry_queued() {
    let transport = Arc::new(RoutedTransport::new().route(
        "https://api.test/c",
        Err(TransportError::Network("connection refused".to_string())),
    ));
    let outbox = RequestOutbox::new(transport.clone(), ConnectivityMonitor::online());
    let mut events = outbox.subscribe();
    let mut signals = outbox.connectivity().subscribe();
    outbox.start();

    outbox.queue_request(entry("3", "C", "https://api.test/c")).await.unwrap();

    eventually(|| outbox.connectivity().is_offline()).await;
    outbox.wait_idle().await;

    assert!(outbox.queue().contains(&RequestId::from("3")).await);
    assert_eq!(transport.calls("https://api.test/c"), 1);

    let signals = drain(&mut signals);
    assert_eq!(
        signals
            .iter()
            .filter(|s| **s == ConnectivityEvent::Offline)
            .count(),
        1
    );
    let names = names(&drain(&mut events));
    assert!(!names.iter().any(|n| n == "C_SUCCESS" || n == "C_ERROR"));

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_queue_request_replays_immediately_when_online() {
    let transport = Arc::new(RoutedTransport::new().route(
        "https://api.test/notes",
        Ok(json!({ "noteId": 42 })),
    ));
    let outbox = RequestOutbox::new(transport.clone(), ConnectivityMonitor::online());
    let mut events = outbox.subscribe();
    outbox.start();

    let queued = entry("n-1", "SAVE_NOTE", "https://api.test/notes");
    outbox.queue_request(queued.clone()).await.unwrap();
    until_queue_empty(&outbox).await;
    outbox.wait_idle().await;

    let events = drain(&mut events);
    let success = events
        .iter()
        .find(|e| e.name() == "SAVE_NOTE_SUCCESS")
        .expect("missing success event");

    let wire = success.to_wire();
    assert_eq!(wire["noteId"], 42);
    assert_eq!(wire["queued"], true);
    assert_eq!(wire["parent"]["id"], "n-1");
    assert_eq!(wire["parent"]["baseType"], "SAVE_NOTE");
    assert_eq!(transport.calls("https://api.test/notes"), 1);

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_persistence_restored_replays_once_per_lifetime() {
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let transport = Arc::new(RoutedTransport::new());
    let outbox = RequestOutbox::builder(transport.clone(), ConnectivityMonitor::online())
        .snapshots(snapshots.clone())
        .build();
    outbox.start();

    outbox.rehydrate().await.unwrap();
    eventually(|| {
        outbox
            .orchestrator()
            .completed_passes(TriggerKind::PersistenceRestored)
            == 1
    })
    .await;

    outbox.rehydrate().await.unwrap();
    // Bus events are handled in order, so once this replay is dispatched the
    // second REHYDRATE has been seen.
    outbox
        .queue_request(entry("x", "PING", "https://api.test/ping"))
        .await
        .unwrap();
    eventually(|| {
        outbox
            .orchestrator()
            .completed_passes(TriggerKind::ExplicitReplay)
            >= 1
    })
    .await;
    outbox.wait_idle().await;

    assert_eq!(
        outbox
            .orchestrator()
            .completed_passes(TriggerKind::PersistenceRestored),
        1
    );

    outbox.shutdown().await;
}

/// Always restores the same queue; writes are accepted and dropped.
struct FixedSnapshots {
    entries: Vec<PendingRequest>,
}

impl SnapshotStore for FixedSnapshots {
    fn load(&self) -> OutboxResult<Option<Vec<PendingRequest>>> {
        Ok(Some(self.entries.clone()))
    }

    fn save(&self, _entries: &[PendingRequest]) -> OutboxResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_restart_does_not_rearm_persistence_replay() {
    let snapshots = Arc::new(FixedSnapshots {
        entries: vec![entry("r", "RESTORED", "https://api.test/restored")],
    });
    let transport = Arc::new(RoutedTransport::new());
    let outbox = RequestOutbox::builder(transport.clone(), ConnectivityMonitor::online())
        .snapshots(snapshots)
        .build();
    let passes = |kind: TriggerKind| outbox.orchestrator().completed_passes(kind);

    outbox.start();
    assert_eq!(outbox.rehydrate().await.unwrap(), 1);
    eventually(|| passes(TriggerKind::PersistenceRestored) == 1).await;
    outbox.wait_idle().await;
    outbox.shutdown().await;

    outbox.start();
    assert_eq!(outbox.rehydrate().await.unwrap(), 1);
    outbox
        .queue_request(entry("x", "PING", "https://api.test/ping"))
        .await
        .unwrap();
    eventually(|| passes(TriggerKind::ExplicitReplay) >= 1).await;
    outbox.wait_idle().await;

    assert_eq!(passes(TriggerKind::PersistenceRestored), 1);

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_same_id_entries_each_send_their_payload() {
    let transport = Arc::new(RoutedTransport::new());
    let outbox = RequestOutbox::new(transport.clone(), ConnectivityMonitor::offline());
    for v in [1, 2] {
        let descriptor =
            RequestDescriptor::new("POST", "https://api.test/dup").with_payload(json!({ "v": v }));
        outbox
            .queue()
            .enqueue(PendingRequest::new("1", "DUP", descriptor))
            .await
            .unwrap();
    }

    outbox.start();
    outbox.connectivity().set_online();
    until_queue_empty(&outbox).await;
    outbox.wait_idle().await;

    let mut sent = transport.payloads();
    sent.sort_by_key(|payload| payload["v"].as_i64());
    assert_eq!(sent, vec![json!({ "v": 1 }), json!({ "v": 2 })]);
    assert!(outbox.queue().is_empty().await);

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_overlapping_triggers_run_each_id_once() {
    let transport = Arc::new(RoutedTransport::gated());
    let outbox = RequestOutbox::new(transport.clone(), ConnectivityMonitor::online());
    outbox.start();

    outbox
        .queue_request(entry("slow", "SYNC", "https://api.test/slow"))
        .await
        .unwrap();
    eventually(|| transport.calls("https://api.test/slow") == 1).await;

    // Both of these replay the queue while `slow` is still running.
    outbox.connectivity().set_online();
    outbox
        .queue_request(entry("fast", "SYNC", "https://api.test/fast"))
        .await
        .unwrap();
    eventually(|| transport.calls("https://api.test/fast") == 1).await;
    eventually(|| {
        outbox
            .orchestrator()
            .completed_passes(TriggerKind::ConnectivityRestored)
            == 1
    })
    .await;

    transport.release();
    until_queue_empty(&outbox).await;
    outbox.wait_idle().await;

    assert_eq!(transport.calls("https://api.test/slow"), 1);
    assert_eq!(transport.calls("https://api.test/fast"), 1);

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_overlapping_triggers_without_dedupe_may_double_send() {
    let transport = Arc::new(RoutedTransport::gated());
    let outbox = RequestOutbox::builder(transport.clone(), ConnectivityMonitor::online())
        .replay_config(ReplayConfig {
            dedupe_in_flight: false,
        })
        .build();
    outbox.start();

    outbox
        .queue_request(entry("slow", "SYNC", "https://api.test/slow"))
        .await
        .unwrap();
    eventually(|| transport.calls("https://api.test/slow") == 1).await;

    outbox.connectivity().set_online();
    eventually(|| transport.calls("https://api.test/slow") == 2).await;

    transport.release();
    until_queue_empty(&outbox).await;
    outbox.wait_idle().await;

    outbox.shutdown().await;
}

#[tokio::test]
async fn test_queue_survives_restart_through_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.json");

    {
        let outbox = RequestOutbox::builder(
            Arc::new(RoutedTransport::new()),
            ConnectivityMonitor::offline(),
        )
        .snapshots(Arc::new(JsonFileSnapshotStore::new(&path)))
        .build();
        outbox.start();
        outbox
            .queue_request(entry("keep", "UPLOAD", "https://api.test/upload"))
            .await
            .unwrap();
        outbox.shutdown().await;
    }

    let store = Arc::new(JsonFileSnapshotStore::new(&path));
    assert_eq!(store.load().unwrap().map(|e| e.len()), Some(1));

    let transport = Arc::new(RoutedTransport::new());
    let outbox = RequestOutbox::builder(transport.clone(), ConnectivityMonitor::online())
        .snapshots(store.clone())
        .build();
    outbox.start();
    assert_eq!(outbox.rehydrate().await.unwrap(), 1);

    until_queue_empty(&outbox).await;
    outbox.wait_idle().await;

    assert_eq!(transport.calls("https://api.test/upload"), 1);
    assert_eq!(store.load().unwrap(), Some(vec![]));

    outbox.shutdown().await;
}
