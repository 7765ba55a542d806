//! Durable Store
//!
//! Exclusive owner of queue persistence. Records come back from `get_all` in
//! the order they were first inserted, which is the order the sync engine
//! replays them in.

pub mod database;
pub mod sqlite;

pub use database::Database;
pub use sqlite::SqliteStore;

use crate::error::OutboxResult;
use crate::operation::{OperationId, QueuedOperation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Queue statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Number of pending operations
    pub pending: usize,
    /// Total size in bytes of queued attachments
    pub attachment_bytes: u64,
    /// Capture time of the operation that replays next
    pub oldest: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert or overwrite by id. An overwrite keeps the original queue position.
    async fn put(&self, operation: &QueuedOperation) -> OutboxResult<()>;

    /// All records, oldest insertion first.
    async fn get_all(&self) -> OutboxResult<Vec<QueuedOperation>>;

    /// Remove a record; absent ids are ignored.
    async fn delete(&self, id: &OperationId) -> OutboxResult<()>;

    async fn count(&self) -> OutboxResult<usize>;

    async fn stats(&self) -> OutboxResult<QueueStats> {
        let all = self.get_all().await?;
        Ok(QueueStats {
            pending: all.len(),
            attachment_bytes: all.iter().map(QueuedOperation::attachment_bytes).sum(),
            oldest: all.first().map(|op| op.created_at),
        })
    }
}
