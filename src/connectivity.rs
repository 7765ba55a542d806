//! Network-availability signal shared by the outbox and the cache manager.

use crate::network::{Network, OutboundRequest};
use crate::sync::PageEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Record the current state. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Polls a URL and reports reachability changes as `Online` / `Offline` events.
///
/// Any HTTP response counts as reachable; only transport failures and
/// timeouts count as offline.
pub struct ConnectivityProbe {
    network: Arc<dyn Network>,
    probe_url: String,
    every: Duration,
    timeout: Duration,
}

impl ConnectivityProbe {
    pub fn new(network: Arc<dyn Network>, probe_url: &str, every: Duration) -> Self {
        Self {
            network,
            probe_url: probe_url.to_string(),
            every,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn check(&self) -> bool {
        let request = OutboundRequest::get(&self.probe_url);
        match tokio::time::timeout(self.timeout, self.network.send(request)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe of {} failed: {}", self.probe_url, e);
                false
            }
            Err(_) => {
                debug!("Probe of {} timed out", self.probe_url);
                false
            }
        }
    }

    /// Run until the event channel closes, sending an event on every change
    /// from the `initial` state.
    pub fn spawn(self, initial: bool, events: mpsc::Sender<PageEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.every);
            let mut last = initial;
            info!("Connectivity probe started for {}", self.probe_url);

            loop {
                ticker.tick().await;
                let online = self.check().await;
                if online == last {
                    continue;
                }
                last = online;

                let event = if online {
                    PageEvent::Online
                } else {
                    warn!("Lost connection to {}", self.probe_url);
                    PageEvent::Offline
                };
                if events.send(event).await.is_err() {
                    debug!("Event channel closed, stopping probe");
                    break;
                }
            }
        })
    }
}
