//! Event dispatcher
//!
//! One `Outbox` per page/process context owns the connectivity signal, the
//! status surface, the interceptor and the sync engine. Host events arrive as
//! `PageEvent`s and are routed through `handle`; `run` additionally drives the
//! periodic timer and the initial pass.

use super::engine::{EngineConfig, SyncEngine};
use crate::capture::{FormSubmission, Interception, SubmissionInterceptor};
use crate::connectivity::Connectivity;
use crate::error::OutboxResult;
use crate::network::Network;
use crate::status::{StatusKind, StatusSurface};
use crate::store::OutboxStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

/// Events the host feeds into the outbox.
#[derive(Debug)]
pub enum PageEvent {
    Online,
    Offline,
    Submit {
        form: FormSubmission,
        reply: Option<oneshot::Sender<OutboxResult<Interception>>>,
    },
    ManualSync,
}

#[derive(Debug, Clone)]
pub struct OutboxOptions {
    pub initially_online: bool,
    pub sync_interval: Duration,
    pub engine: EngineConfig,
}

impl Default for OutboxOptions {
    fn default() -> Self {
        Self {
            initially_online: true,
            sync_interval: Duration::from_secs(30),
            engine: EngineConfig::default(),
        }
    }
}

pub struct Outbox {
    store: Option<Arc<dyn OutboxStore>>,
    connectivity: Connectivity,
    status: StatusSurface,
    interceptor: SubmissionInterceptor,
    engine: Option<Arc<SyncEngine>>,
    sync_interval: Duration,
}

impl Outbox {
    /// Build a context. Without a store, submissions degrade to pass-through
    /// and there is nothing to sync.
    pub fn new(
        store: Option<Arc<dyn OutboxStore>>,
        network: Arc<dyn Network>,
        options: OutboxOptions,
    ) -> Self {
        let connectivity = Connectivity::new(options.initially_online);
        let status = StatusSurface::new();
        let interceptor =
            SubmissionInterceptor::new(store.clone(), connectivity.clone(), status.clone());
        let engine = store.clone().map(|store| {
            Arc::new(SyncEngine::new(
                store,
                network,
                connectivity.clone(),
                status.clone(),
                options.engine.clone(),
            ))
        });

        if !options.initially_online {
            status.set(StatusKind::Offline, 0);
        }

        Self {
            store,
            connectivity,
            status,
            interceptor,
            engine,
            sync_interval: options.sync_interval,
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn status(&self) -> &StatusSurface {
        &self.status
    }

    pub fn engine(&self) -> Option<&Arc<SyncEngine>> {
        self.engine.as_ref()
    }

    pub async fn pending_count(&self) -> usize {
        match &self.store {
            Some(store) => store.count().await.unwrap_or_else(|e| {
                warn!("Cannot count outbox: {}", e);
                0
            }),
            None => 0,
        }
    }

    /// Route one event. Returns the spawned sync pass, if the event started one.
    pub async fn handle(&self, event: PageEvent) -> Option<JoinHandle<()>> {
        match event {
            PageEvent::Online => {
                if !self.connectivity.set_online(true) {
                    return None;
                }
                info!("Back online");
                self.status.settle(true, self.pending_count().await);
                self.trigger_sync()
            }
            PageEvent::Offline => {
                if self.connectivity.set_online(false) {
                    warn!("Gone offline, queueing eligible submissions");
                }
                self.status.set(StatusKind::Offline, self.pending_count().await);
                None
            }
            PageEvent::Submit { form, reply } => {
                let result = self.interceptor.intercept(&form).await;
                if let Err(e) = &result {
                    debug!("Submission to {} not queued: {}", form.action, e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
                None
            }
            PageEvent::ManualSync => {
                info!("Manual sync triggered");
                self.trigger_sync()
            }
        }
    }

    /// Capture a submission directly, bypassing the event channel.
    pub async fn submit(&self, form: &FormSubmission) -> OutboxResult<Interception> {
        self.interceptor.intercept(form).await
    }

    fn trigger_sync(&self) -> Option<JoinHandle<()>> {
        let engine = self.engine.clone()?;
        Some(tokio::spawn(async move {
            if let Err(e) = engine.sync_now().await {
                error!("Sync pass failed: {}", e);
            }
        }))
    }

    /// Process events until every sender is dropped.
    pub async fn run(&self, mut events: mpsc::Receiver<PageEvent>) {
        let pending = self.pending_count().await;
        self.status.settle(self.connectivity.is_online(), pending);
        if pending > 0 {
            info!("{} operations queued on start, running initial sync", pending);
            self.trigger_sync();
        }

        let mut timer = interval_at(Instant::now() + self.sync_interval, self.sync_interval);
        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if self.connectivity.is_online() {
                        debug!("Periodic sync");
                        self.trigger_sync();
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(event) => {
                            self.handle(event).await;
                        }
                        None => {
                            info!("Event channel closed, outbox stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}
