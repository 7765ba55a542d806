//! Sync Engine
//!
//! Replays queued operations oldest-first. A record is deleted only after the
//! server answered 2xx; the first failure ends the pass so that a later write
//! never lands before an earlier one that is still failing.

use crate::connectivity::Connectivity;
use crate::error::{OutboxError, OutboxResult};
use crate::network::Network;
use crate::operation::{OperationId, QueuedOperation};
use crate::status::{StatusKind, StatusSurface};
use crate::store::OutboxStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound for a single replay; `None` waits for the network stack.
    pub replay_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            replay_timeout: Some(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadySyncing,
    EmptyQueue,
}

/// Where a pass stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub id: OperationId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub replayed: usize,
    pub remaining: usize,
    pub halted: Option<Halt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Finished(SyncReport),
}

pub struct SyncEngine {
    store: Arc<dyn OutboxStore>,
    network: Arc<dyn Network>,
    connectivity: Connectivity,
    status: StatusSurface,
    config: EngineConfig,
    /// Held for the whole pass; a failed try_lock means a pass is running.
    syncing: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        network: Arc<dyn Network>,
        connectivity: Connectivity,
        status: StatusSurface,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            network,
            connectivity,
            status,
            config,
            syncing: Mutex::new(()),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.try_lock().is_err()
    }

    /// Run one pass. Triggers arriving while a pass runs are dropped.
    pub async fn sync_now(&self) -> OutboxResult<SyncOutcome> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }

        let _guard = match self.syncing.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Sync already running, trigger coalesced");
                return Ok(SyncOutcome::Skipped(SkipReason::AlreadySyncing));
            }
        };

        let pending = match self.store.get_all().await {
            Ok(pending) => pending,
            Err(e) => {
                error!("Cannot read outbox: {}", e);
                let pending = self.store.count().await.unwrap_or(0);
                self.status.notice(e.user_message(), pending);
                return Err(e);
            }
        };
        if pending.is_empty() {
            return Ok(SyncOutcome::Skipped(SkipReason::EmptyQueue));
        }

        info!("Starting sync of {} queued operations", pending.len());
        self.status.set(StatusKind::Syncing, pending.len());

        let (replayed, failure) = self.replay_all(&pending).await;

        let remaining = match self.store.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Cannot recount outbox: {}", e);
                pending.len() - replayed
            }
        };

        let halted = match failure {
            Some((id, e)) => {
                warn!(
                    "Sync halted at {} after {} replayed, {} remaining: {}",
                    id, replayed, remaining, e
                );
                self.status.notice(e.user_message(), remaining);
                Some(Halt {
                    id,
                    reason: e.to_string(),
                })
            }
            None => {
                info!("Sync finished: {} replayed, {} remaining", replayed, remaining);
                self.status.settle(self.connectivity.is_online(), remaining);
                None
            }
        };

        Ok(SyncOutcome::Finished(SyncReport {
            replayed,
            remaining,
            halted,
        }))
    }

    async fn replay_all(
        &self,
        pending: &[QueuedOperation],
    ) -> (usize, Option<(OperationId, OutboxError)>) {
        let mut replayed = 0;

        for operation in pending {
            if let Err(e) = self.replay(operation).await {
                return (replayed, Some((operation.id.clone(), e)));
            }

            if let Err(e) = self.store.delete(&operation.id).await {
                // Delivered but still queued; the server drops the duplicate later.
                error!("Replayed {} but could not remove it: {}", operation.id, e);
                return (replayed, Some((operation.id.clone(), e)));
            }

            replayed += 1;
            debug!("Replayed {} {} ({})", operation.method, operation.target_url, operation.id);
        }

        (replayed, None)
    }

    async fn replay(&self, operation: &QueuedOperation) -> OutboxResult<()> {
        let failure = |reason: String| OutboxError::ReplayFailure {
            id: operation.id.to_string(),
            reason,
        };

        let request = operation.replay_request()?;
        let sent = match self.config.replay_timeout {
            Some(limit) => tokio::time::timeout(limit, self.network.send(request))
                .await
                .map_err(|_| failure(format!("no response within {:?}", limit)))?,
            None => self.network.send(request).await,
        };

        let response = sent.map_err(|e| failure(e.to_string()))?;
        if !response.is_success() {
            return Err(failure(format!("HTTP {}", response.status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NetResponse, OutboundRequest, RequestBody};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    /// Records every request and answers from a script of statuses (200 once exhausted).
    #[derive(Default)]
    struct ScriptedNetwork {
        seen: StdMutex<Vec<OutboundRequest>>,
        script: StdMutex<Vec<u16>>,
    }

    impl ScriptedNetwork {
        fn with_statuses(statuses: &[u16]) -> Self {
            let mut script = statuses.to_vec();
            script.reverse();
            Self {
                seen: StdMutex::new(Vec::new()),
                script: StdMutex::new(script),
            }
        }

        fn seen(&self) -> Vec<OutboundRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Network for ScriptedNetwork {
        async fn send(&self, request: OutboundRequest) -> OutboxResult<NetResponse> {
            self.seen.lock().unwrap().push(request);
            let status = self.script.lock().unwrap().pop().unwrap_or(200);
            if status == 0 {
                return Err(OutboxError::NetworkError("connection reset".to_string()));
            }
            Ok(NetResponse::new(status, "text/plain", ""))
        }
    }

    struct HangingNetwork;

    #[async_trait]
    impl Network for HangingNetwork {
        async fn send(&self, _request: OutboundRequest) -> OutboxResult<NetResponse> {
            std::future::pending().await
        }
    }

    async fn seeded_store(count: usize) -> (Arc<SqliteStore>, Vec<QueuedOperation>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let mut ops = Vec::new();
        for i in 0..count {
            let op = QueuedOperation::url_encoded(
                "/fees/pay",
                "POST",
                vec![("receipt".to_string(), i.to_string())],
            );
            store.put(&op).await.unwrap();
            ops.push(op);
        }
        (store, ops)
    }

    fn engine(store: Arc<SqliteStore>, network: Arc<dyn Network>, online: bool) -> SyncEngine {
        SyncEngine::new(
            store,
            network,
            Connectivity::new(online),
            StatusSurface::new(),
            EngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_drains_in_order() {
        let (store, ops) = seeded_store(3).await;
        let network = Arc::new(ScriptedNetwork::default());
        let engine = engine(store.clone(), network.clone(), true);

        let outcome = engine.sync_now().await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Finished(SyncReport {
                replayed: 3,
                remaining: 0,
                halted: None
            })
        );

        let bodies: Vec<_> = network.seen().into_iter().map(|r| r.body).collect();
        let expected: Vec<_> = ops
            .iter()
            .map(|op| RequestBody::UrlEncoded(op.url_encoded_body().unwrap()))
            .collect();
        assert_eq!(bodies, expected);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_halts_on_first_failure() {
        let (store, ops) = seeded_store(4).await;
        let network = Arc::new(ScriptedNetwork::with_statuses(&[200, 500]));
        let engine = engine(store.clone(), network.clone(), true);

        let SyncOutcome::Finished(report) = engine.sync_now().await.unwrap() else {
            panic!("pass should have run");
        };
        assert_eq!(report.replayed, 1);
        assert_eq!(report.remaining, 3);
        assert_eq!(report.halted.as_ref().unwrap().id, ops[1].id);
        assert!(report.halted.unwrap().reason.contains("HTTP 500"));

        // Nothing after the failed record was attempted
        assert_eq!(network.seen().len(), 2);
        let left: Vec<_> = store.get_all().await.unwrap().into_iter().map(|o| o.id).collect();
        assert_eq!(left, ops[1..].iter().map(|o| o.id.clone()).collect::<Vec<_>>());
        let status = engine.status.current();
        assert_eq!(status.text(), "Sync interrupted, will retry.");
        assert_eq!(status.pending, 3);
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_record() {
        let (store, _) = seeded_store(1).await;
        let network = Arc::new(ScriptedNetwork::with_statuses(&[0]));
        let engine = engine(store.clone(), network, true);

        let SyncOutcome::Finished(report) = engine.sync_now().await.unwrap() else {
            panic!("pass should have run");
        };
        assert!(report.halted.unwrap().reason.contains("connection reset"));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_and_empty_are_noops() {
        let (store, _) = seeded_store(1).await;
        let network = Arc::new(ScriptedNetwork::default());
        let offline = engine(store.clone(), network.clone(), false);
        assert_eq!(
            offline.sync_now().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::Offline)
        );
        assert!(network.seen().is_empty());

        let (empty_store, _) = seeded_store(0).await;
        let empty = engine(empty_store, network, true);
        assert_eq!(
            empty.sync_now().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::EmptyQueue)
        );
    }

    #[tokio::test]
    async fn test_concurrent_trigger_is_coalesced() {
        let (store, _) = seeded_store(1).await;
        let engine = engine(store, Arc::new(ScriptedNetwork::default()), true);

        let _held = engine.syncing.lock().await;
        assert!(engine.is_syncing());
        assert_eq!(
            engine.sync_now().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::AlreadySyncing)
        );
    }

    /// Counts work but the full read fails.
    struct UnreadableStore(SqliteStore);

    #[async_trait]
    impl OutboxStore for UnreadableStore {
        async fn put(&self, operation: &QueuedOperation) -> OutboxResult<()> {
            self.0.put(operation).await
        }

        async fn get_all(&self) -> OutboxResult<Vec<QueuedOperation>> {
            Err(OutboxError::StorageUnavailable("database is locked".to_string()))
        }

        async fn delete(&self, id: &OperationId) -> OutboxResult<()> {
            self.0.delete(id).await
        }

        async fn count(&self) -> OutboxResult<usize> {
            self.0.count().await
        }
    }

    #[tokio::test]
    async fn test_read_failure_keeps_reported_depth() {
        let store = Arc::new(UnreadableStore(SqliteStore::open_in_memory().unwrap()));
        for i in 0..2 {
            let op = QueuedOperation::url_encoded(
                "/fees/pay",
                "POST",
                vec![("n".to_string(), i.to_string())],
            );
            store.put(&op).await.unwrap();
        }
        let status = StatusSurface::new();
        let engine = SyncEngine::new(
            store,
            Arc::new(ScriptedNetwork::default()),
            Connectivity::new(true),
            status.clone(),
            EngineConfig::default(),
        );

        assert!(matches!(
            engine.sync_now().await,
            Err(OutboxError::StorageUnavailable(_))
        ));
        assert!(matches!(status.current().kind, StatusKind::Notice(_)));
        assert_eq!(status.current().pending, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_timeout_is_a_failure() {
        let (store, _) = seeded_store(2).await;
        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(HangingNetwork),
            Connectivity::new(true),
            StatusSurface::new(),
            EngineConfig {
                replay_timeout: Some(Duration::from_secs(5)),
            },
        );

        let SyncOutcome::Finished(report) = engine.sync_now().await.unwrap() else {
            panic!("pass should have run");
        };
        assert_eq!(report.replayed, 0);
        assert!(report.halted.unwrap().reason.contains("no response within"));
        assert_eq!(store.count().await.unwrap(), 2);
    }
}
