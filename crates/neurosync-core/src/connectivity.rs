//! Backend reachability tracking.
//!
//! `ConnectivityGate` holds the last known state and notifies subscribers
//! on online/offline transitions. The platform layer (or the optional
//! [`ReachabilityProbe`]) feeds it; the dispatcher only reads it. A stale
//! "online" is tolerated since every transport attempt has its own deadline.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::transport::{RequestBody, Transport, TransportRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

/// Shared, cheaply cloneable handle to the current connectivity state.
#[derive(Clone)]
pub struct ConnectivityGate {
    state: Arc<watch::Sender<Connectivity>>,
}

impl ConnectivityGate {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(Self::to_state(online));
        Self {
            state: Arc::new(tx),
        }
    }

    fn to_state(online: bool) -> Connectivity {
        if online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow() == Connectivity::Online
    }

    pub fn status(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// Record a new state. Subscribers are only woken on an actual transition.
    pub fn set_online(&self, online: bool) {
        let next = Self::to_state(online);
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(status = ?next, "Connectivity changed");
        }
    }

    /// Receiver that yields on every online<->offline transition.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Background task that polls an unauthenticated health endpoint and feeds
/// the gate. Any HTTP response counts as reachable.
pub struct ReachabilityProbe {
    handle: JoinHandle<()>,
}

impl ReachabilityProbe {
    pub fn spawn(
        gate: ConnectivityGate,
        transport: Arc<dyn Transport>,
        url: String,
        interval: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let request = TransportRequest {
                    method: Method::GET,
                    url: url.clone(),
                    bearer: None,
                    body: RequestBody::Empty,
                };
                let reachable = match transport.send(request).await {
                    Ok(response) => {
                        debug!(status = response.status, "Health probe answered");
                        true
                    }
                    Err(e) => {
                        debug!(error = %e, "Health probe failed");
                        false
                    }
                };
                gate.set_online(reachable);
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ReachabilityProbe {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_online_toggles_state() {
        let gate = ConnectivityGate::new(true);
        assert!(gate.is_online());
        gate.set_online(false);
        assert!(!gate.is_online());
        assert_eq!(gate.status(), Connectivity::Offline);
    }

    #[test]
    fn test_clones_share_state() {
        let gate = ConnectivityGate::default();
        let other = gate.clone();
        other.set_online(false);
        assert!(!gate.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_notified_on_transition_only() {
        let gate = ConnectivityGate::new(true);
        let mut rx = gate.subscribe();

        gate.set_online(true);
        assert!(!rx.has_changed().unwrap());

        gate.set_online(false);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);
    }
}
