//! Subcommand implementations.

use crate::probe::ConnectivityProbe;
use request_outbox::{
    ConnectivityMonitor, JsonFileSnapshotStore, OutboxConfig, OutboxEvent, Paths, PendingRequest,
    RequestDescriptor, RequestId, RequestOutbox, SnapshotStore,
};
use serde_json::Value;
use std::error::Error;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Arguments of `enqueue`.
pub struct EnqueueArgs {
    pub id: Option<String>,
    pub base_type: String,
    pub url: String,
    pub method: String,
    pub payload: Option<String>,
}

/// Append a request to the persisted queue. Returns the entry's id.
///
/// Meant for a stopped daemon; a running one only sees the entry after its
/// next restart.
pub fn enqueue(
    config: &OutboxConfig,
    paths: &Paths,
    args: EnqueueArgs,
) -> Result<RequestId, Box<dyn Error>> {
    let mut descriptor = RequestDescriptor::new(args.method, args.url);
    if let Some(raw) = args.payload {
        let payload: Value = serde_json::from_str(&raw)?;
        descriptor = descriptor.with_payload(payload);
    }

    let id = args
        .id
        .map(RequestId::from_string)
        .unwrap_or_else(RequestId::generate);
    let entry = PendingRequest::new(id.clone(), args.base_type, descriptor);

    let store = JsonFileSnapshotStore::new(config.snapshot_path(paths));
    let mut entries = store.load()?.unwrap_or_default();
    entries.push(entry);
    store.save(&entries)?;

    info!(request_id = %id, queued = entries.len(), "Request added to snapshot");
    Ok(id)
}

/// Persisted queue rendered as pretty JSON.
pub fn list(config: &OutboxConfig, paths: &Paths) -> Result<String, Box<dyn Error>> {
    let store = JsonFileSnapshotStore::new(config.snapshot_path(paths));
    let entries = store.load()?.unwrap_or_default();
    Ok(serde_json::to_string_pretty(&entries)?)
}

/// Run the outbox until Ctrl-C.
pub async fn run(config: OutboxConfig, paths: Paths) -> Result<(), Box<dyn Error>> {
    paths.ensure_dirs()?;

    // Stay offline until the first probe says otherwise.
    let connectivity = ConnectivityMonitor::offline();
    let outbox = RequestOutbox::from_config(&config, &paths, connectivity.clone())?;
    let probe = ConnectivityProbe::new(
        config.probe_url.clone(),
        config.probe_interval(),
        config.request_timeout(),
    )?;

    let events = outbox.subscribe();
    let (stop, shutdown) = watch::channel(false);
    let logger = tokio::spawn(log_events(events, shutdown.clone()));

    outbox.start();
    let restored = outbox.rehydrate().await?;
    info!(
        restored,
        snapshot = %config.snapshot_path(&paths).display(),
        "Outbox running"
    );

    let probe_task = tokio::spawn(probe.run(connectivity, shutdown));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    stop.send_replace(true);
    outbox.shutdown().await;
    let _ = probe_task.await;
    let _ = logger.await;

    info!(queued = outbox.queue().len().await, "Outbox stopped");
    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<OutboxEvent>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    info!(event = %event.name(), body = %event.to_wire(), "Outbox event");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
