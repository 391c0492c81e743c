//! Network Reachability Monitor.
//!
//! The engine needs a point-in-time connectivity check and a stream of
//! transitions. Subscribers receive `true`/`false` on every change; dropping
//! the receiver unsubscribes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the transition channel; laggards only miss stale transitions.
const TRANSITION_CHANNEL_CAPACITY: usize = 64;

pub trait Reachability: Send + Sync {
    /// Whether the device is currently connected
    fn check(&self) -> bool;

    /// Receive `connected` transition events
    fn subscribe(&self) -> broadcast::Receiver<bool>;
}

/// Reachability driven by whoever owns it (OS callback, CLI flag, test).
pub struct ManualReachability {
    connected: AtomicBool,
    // Serializes flip-and-send so subscribers see transitions in order.
    transition: Mutex<()>,
    tx: broadcast::Sender<bool>,
}

impl ManualReachability {
    pub fn new(connected: bool) -> Self {
        let (tx, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            connected: AtomicBool::new(connected),
            transition: Mutex::new(()),
            tx,
        }
    }

    /// Set connectivity; emits an event only when the value changes.
    ///
    /// Returns whether a transition happened.
    pub fn set_connected(&self, connected: bool) -> bool {
        let _guard = self.transition.lock();
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return false;
        }
        debug!(connected, "Reachability transition");
        // No subscribers is fine
        let _ = self.tx.send(connected);
        true
    }
}

impl Default for ManualReachability {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Reachability for ManualReachability {
    fn check(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Try to open a TCP connection to `addr` within `timeout`.
pub async fn probe_tcp(addr: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(addr, error = %e, "Reachability probe failed");
            false
        }
        Err(_) => {
            debug!(addr, ?timeout, "Reachability probe timed out");
            false
        }
    }
}

/// Probe the host of a gateway URL (`https://host[:port]/...`).
pub async fn probe_url(url: &str, timeout: Duration) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        debug!(url, "Unparseable gateway url, treating as offline");
        return false;
    };
    let (Some(host), Some(port)) = (parsed.host_str(), parsed.port_or_known_default()) else {
        return false;
    };
    probe_tcp(&format!("{}:{}", host, port), timeout).await
}
