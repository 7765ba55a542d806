//! SQLite database shared by the outbox store and the response cache.
//!
//! One file holds three tables:
//! - `queued_operations` - pending writes, ordered by an autoincrement `seq`
//! - `queued_files` - attachment bytes keyed by operation id and position
//! - `cache_entries` - cached responses grouped into versioned buckets

use crate::error::{OutboxError, OutboxResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Shared handle to the SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open_at(path: &Path) -> OutboxResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    OutboxError::StorageUnavailable(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            OutboxError::StorageUnavailable(format!(
                "Failed to open database {}: {}",
                path.display(),
                e
            ))
        })?;

        // journal_mode answers with the mode it settled on
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        Self::init(conn)
    }

    pub fn open_in_memory() -> OutboxResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            OutboxError::StorageUnavailable(format!("Failed to open in-memory database: {}", e))
        })?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> OutboxResult<Self> {
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

fn init_schema(conn: &Connection) -> OutboxResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queued_operations (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            target_url TEXT NOT NULL,
            method TEXT NOT NULL,
            encoding TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS queued_files (
            operation_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            field TEXT NOT NULL,
            file_name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            bytes BLOB NOT NULL,
            PRIMARY KEY (operation_id, position)
        );

        CREATE TABLE IF NOT EXISTS cache_entries (
            bucket TEXT NOT NULL,
            request_key TEXT NOT NULL,
            status INTEGER NOT NULL,
            headers TEXT NOT NULL,
            body BLOB NOT NULL,
            stored_at INTEGER NOT NULL,
            PRIMARY KEY (bucket, request_key)
        );",
    )
    .map_err(|e| OutboxError::StorageUnavailable(format!("Failed to create schema: {}", e)))
}
