//! SQLite-backed outbox store.

use super::{Database, OutboxStore, QueueStats};
use crate::error::OutboxResult;
use crate::operation::{Encoding, FileAttachment, OperationId, QueuedOperation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::path::Path;

pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open_at(path: &Path) -> OutboxResult<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> OutboxResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn row_to_operation(row: &Row<'_>) -> rusqlite::Result<QueuedOperation> {
    let id: String = row.get(0)?;
    let target_url: String = row.get(1)?;
    let method: String = row.get(2)?;
    let encoding_str: String = row.get(3)?;
    let fields_str: String = row.get(4)?;
    let created_at_str: String = row.get(5)?;

    let encoding: Encoding = encoding_str.parse().map_err(|e| conversion_error(3, e))?;
    let fields: Vec<(String, String)> =
        serde_json::from_str(&fields_str).map_err(|e| conversion_error(4, e))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map_err(|e| conversion_error(5, e))?
        .with_timezone(&Utc);

    Ok(QueuedOperation {
        id: OperationId::from(id),
        target_url,
        method,
        encoding,
        fields,
        files: Vec::new(),
        created_at,
    })
}

fn load_files(conn: &Connection) -> rusqlite::Result<HashMap<String, Vec<FileAttachment>>> {
    let mut stmt = conn.prepare(
        "SELECT operation_id, field, file_name, mime_type, bytes
         FROM queued_files
         ORDER BY operation_id, position",
    )?;

    let rows = stmt.query_map([], |row| {
        let operation_id: String = row.get(0)?;
        Ok((
            operation_id,
            FileAttachment {
                field: row.get(1)?,
                file_name: row.get(2)?,
                mime_type: row.get(3)?,
                bytes: row.get(4)?,
            },
        ))
    })?;

    let mut files: HashMap<String, Vec<FileAttachment>> = HashMap::new();
    for row in rows {
        let (operation_id, file) = row?;
        files.entry(operation_id).or_default().push(file);
    }
    Ok(files)
}

#[async_trait]
impl OutboxStore for SqliteStore {
    async fn put(&self, operation: &QueuedOperation) -> OutboxResult<()> {
        let fields = serde_json::to_string(&operation.fields)?;
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO queued_operations (id, target_url, method, encoding, fields, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
             target_url = excluded.target_url,
             method = excluded.method,
             encoding = excluded.encoding,
             fields = excluded.fields,
             created_at = excluded.created_at",
            params![
                operation.id.as_str(),
                operation.target_url,
                operation.method,
                operation.encoding.as_str(),
                fields,
                operation.created_at.to_rfc3339(),
            ],
        )?;

        tx.execute(
            "DELETE FROM queued_files WHERE operation_id = ?1",
            params![operation.id.as_str()],
        )?;
        for (position, file) in operation.files.iter().enumerate() {
            tx.execute(
                "INSERT INTO queued_files (operation_id, position, field, file_name, mime_type, bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    operation.id.as_str(),
                    position as i64,
                    file.field,
                    file.file_name,
                    file.mime_type,
                    file.bytes,
                ],
            )?;
        }

        tx.commit()?;
        tracing::debug!(
            "Stored operation {} ({} {}, {} files)",
            operation.id,
            operation.method,
            operation.target_url,
            operation.files.len()
        );
        Ok(())
    }

    async fn get_all(&self) -> OutboxResult<Vec<QueuedOperation>> {
        let conn = self.db.lock().await;
        let mut files = load_files(&conn)?;

        let mut stmt = conn.prepare(
            "SELECT id, target_url, method, encoding, fields, created_at
             FROM queued_operations
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], row_to_operation)?;

        let mut operations = Vec::new();
        for row in rows {
            let mut operation = row?;
            operation.files = files.remove(operation.id.as_str()).unwrap_or_default();
            operations.push(operation);
        }
        Ok(operations)
    }

    async fn delete(&self, id: &OperationId) -> OutboxResult<()> {
        let mut conn = self.db.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM queued_files WHERE operation_id = ?1",
            params![id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM queued_operations WHERE id = ?1",
            params![id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn count(&self) -> OutboxResult<usize> {
        let conn = self.db.lock().await;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM queued_operations", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn stats(&self) -> OutboxResult<QueueStats> {
        let conn = self.db.lock().await;
        let pending: i64 =
            conn.query_row("SELECT COUNT(*) FROM queued_operations", [], |row| row.get(0))?;
        let attachment_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(bytes)), 0) FROM queued_files",
            [],
            |row| row.get(0),
        )?;
        let oldest: Option<String> = conn
            .query_row(
                "SELECT created_at FROM queued_operations ORDER BY seq ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(QueueStats {
            pending: pending as usize,
            attachment_bytes: attachment_bytes as u64,
            oldest: oldest
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|t| t.with_timezone(&Utc)),
        })
    }
}
