//! Connectivity status and the gate that parks tasks while offline.

use std::fmt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Capacity of the connectivity transition channel.
const EVENT_CAPACITY: usize = 64;

/// Current reachability of the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Online,
    Offline,
}

impl ConnectivityStatus {
    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

/// Connectivity transition signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    Online,
    Offline,
}

impl ConnectivityEvent {
    /// Wire name (`ONLINE` / `OFFLINE`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
        }
    }
}

impl fmt::Display for ConnectivityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status plus a counter bumped by every ONLINE signal.
#[derive(Debug, Clone, Copy)]
struct GateState {
    status: ConnectivityStatus,
    online_epoch: u64,
}

/// Shared connectivity state plus its event stream.
///
/// External providers drive it with [`set_online`](Self::set_online) and
/// [`set_offline`](Self::set_offline). Executors feed back
/// [`report_offline`](Self::report_offline) when a call fails for
/// connectivity reasons.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    state: watch::Sender<GateState>,
    events: broadcast::Sender<ConnectivityEvent>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityStatus) -> Self {
        let (state, _) = watch::channel(GateState {
            status: initial,
            online_epoch: 0,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { state, events }
    }

    /// Monitor that starts online.
    pub fn online() -> Self {
        Self::new(ConnectivityStatus::Online)
    }

    /// Monitor that starts offline.
    pub fn offline() -> Self {
        Self::new(ConnectivityStatus::Offline)
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.state.borrow().status
    }

    pub fn is_offline(&self) -> bool {
        !self.status().is_online()
    }

    /// Subscribe to ONLINE / OFFLINE signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Record an ONLINE signal and wake every parked task.
    pub fn set_online(&self) {
        self.state.send_modify(|state| {
            state.status = ConnectivityStatus::Online;
            state.online_epoch += 1;
        });
        info!("Connectivity restored");
        let _ = self.events.send(ConnectivityEvent::Online);
    }

    /// Record an OFFLINE signal.
    pub fn set_offline(&self) {
        self.state
            .send_modify(|state| state.status = ConnectivityStatus::Offline);
        info!("Connectivity lost");
        let _ = self.events.send(ConnectivityEvent::Offline);
    }

    /// OFFLINE signal raised by an executor that classified a network failure.
    pub fn report_offline(&self) {
        debug!("Executor reported network failure");
        self.set_offline();
    }

    /// Connectivity gate.
    ///
    /// Returns immediately when online, otherwise parks until the next ONLINE
    /// signal. An ONLINE that is followed by OFFLINE before the waiter runs
    /// still releases it. There is no timeout.
    pub async fn wait_until_online(&self) {
        let mut rx = self.state.subscribe();
        let current = *rx.borrow_and_update();
        if current.status.is_online() {
            return;
        }

        debug!("Waiting for connectivity");
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx
            .wait_for(|state| state.online_epoch != current.online_epoch)
            .await;
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_returns_immediately_when_online() {
        let monitor = ConnectivityMonitor::online();
        tokio::time::timeout(Duration::from_millis(100), monitor.wait_until_online())
            .await
            .expect("gate should not block while online");
    }

    #[tokio::test]
    async fn test_gate_blocks_while_offline() {
        let monitor = ConnectivityMonitor::offline();
        let waited =
            tokio::time::timeout(Duration::from_millis(50), monitor.wait_until_online()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_gate_released_by_online_signal() {
        let monitor = ConnectivityMonitor::offline();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_until_online().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        monitor.set_online();
        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("gate should open after ONLINE")
            .unwrap();
    }

    #[tokio::test]
    async fn test_gate_released_by_online_even_if_offline_follows() {
        let monitor = ConnectivityMonitor::offline();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_until_online().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A concurrent executor fails fast and flips the status back.
        monitor.set_online();
        monitor.report_offline();

        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("gate should open on the ONLINE transition")
            .unwrap();
        assert!(monitor.is_offline());
    }

    #[tokio::test]
    async fn test_offline_signal_does_not_release_gate() {
        let monitor = ConnectivityMonitor::offline();
        let waiter = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.wait_until_online().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.set_offline();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        monitor.set_online();
        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_transitions_are_broadcast() {
        let monitor = ConnectivityMonitor::online();
        let mut rx = monitor.subscribe();

        monitor.report_offline();
        assert!(monitor.is_offline());
        assert_eq!(rx.recv().await.unwrap(), ConnectivityEvent::Offline);

        monitor.set_online();
        assert!(!monitor.is_offline());
        assert_eq!(rx.recv().await.unwrap(), ConnectivityEvent::Online);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ConnectivityEvent::Online.to_string(), "ONLINE");
        assert_eq!(ConnectivityEvent::Offline.to_string(), "OFFLINE");
    }
}
