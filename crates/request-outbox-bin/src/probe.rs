//! Periodic reachability probe feeding the connectivity monitor.

use request_outbox::{ConnectivityMonitor, OutboxResult};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// What the monitor should be told after a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAction {
    Online,
    Offline,
    Unchanged,
}

/// Decide whether a probe result is a transition.
///
/// An executor may have flipped the monitor offline on its own, so the
/// comparison is against the monitor's status, not the previous probe.
pub fn decide(currently_offline: bool, reachable: bool) -> ProbeAction {
    match (currently_offline, reachable) {
        (true, true) => ProbeAction::Online,
        (false, false) => ProbeAction::Offline,
        _ => ProbeAction::Unchanged,
    }
}

/// Checks a URL on an interval and emits ONLINE/OFFLINE on transitions.
pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(url: impl Into<String>, interval: Duration, timeout: Duration) -> OutboxResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            interval,
        })
    }

    /// Any HTTP response counts as reachable; only transport errors do not.
    pub async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Probe reached endpoint");
                true
            }
            Err(e) => {
                debug!(url = %self.url, error = %e, "Probe failed");
                false
            }
        }
    }

    /// Probe until `shutdown` flips to true.
    pub async fn run(self, monitor: ConnectivityMonitor, mut shutdown: watch::Receiver<bool>) {
        info!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "Connectivity probe started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reachable = self.check().await;
                    match decide(monitor.is_offline(), reachable) {
                        ProbeAction::Online => monitor.set_online(),
                        ProbeAction::Offline => monitor.set_offline(),
                        ProbeAction::Unchanged => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Connectivity probe stopped");
    }
}
