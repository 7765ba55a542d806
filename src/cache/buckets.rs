//! Versioned response buckets stored in the shared SQLite database.

use crate::error::OutboxResult;
use crate::network::NetResponse;
use crate::store::Database;
use rusqlite::{params, OptionalExtension};

/// Headers that must never be replayed from cache.
const UNCACHEABLE_HEADERS: &[&str] = &["set-cookie"];

#[derive(Clone)]
pub struct CacheBuckets {
    db: Database,
}

impl CacheBuckets {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, bucket: &str, key: &str) -> OutboxResult<Option<NetResponse>> {
        let conn = self.db.lock().await;
        let row = conn
            .query_row(
                "SELECT status, headers, body FROM cache_entries
                 WHERE bucket = ?1 AND request_key = ?2",
                params![bucket, key],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((status, headers, body)) => Ok(Some(NetResponse {
                status,
                headers: serde_json::from_str(&headers)?,
                body,
            })),
            None => Ok(None),
        }
    }

    pub async fn put(&self, bucket: &str, key: &str, response: &NetResponse) -> OutboxResult<()> {
        let headers: Vec<&(String, String)> = response
            .headers
            .iter()
            .filter(|(name, _)| {
                !UNCACHEABLE_HEADERS
                    .iter()
                    .any(|h| name.eq_ignore_ascii_case(h))
            })
            .collect();
        let headers = serde_json::to_string(&headers)?;

        let conn = self.db.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (bucket, request_key, status, headers, body, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bucket,
                key,
                response.status,
                headers,
                response.body,
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    pub async fn bucket_names(&self) -> OutboxResult<Vec<String>> {
        let conn = self.db.lock().await;
        let mut stmt = conn.prepare("SELECT DISTINCT bucket FROM cache_entries ORDER BY bucket")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub async fn entry_count(&self, bucket: &str) -> OutboxResult<usize> {
        let conn = self.db.lock().await;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE bucket = ?1",
            params![bucket],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Drop every bucket except `keep`, returning the dropped names.
    pub async fn delete_except(&self, keep: &str) -> OutboxResult<Vec<String>> {
        let stale: Vec<String> = self
            .bucket_names()
            .await?
            .into_iter()
            .filter(|name| name != keep)
            .collect();

        let conn = self.db.lock().await;
        conn.execute("DELETE FROM cache_entries WHERE bucket != ?1", params![keep])?;
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buckets() -> CacheBuckets {
        CacheBuckets::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_put_get_strips_cookies() {
        let buckets = buckets();
        let mut response = NetResponse::new(200, "text/html", "<h1>Fees</h1>");
        response
            .headers
            .push(("Set-Cookie".to_string(), "session=abc".to_string()));

        buckets.put("outbox-v1", "GET /fees", &response).await.unwrap();
        let cached = buckets.get("outbox-v1", "GET /fees").await.unwrap().unwrap();

        assert_eq!(cached.text(), "<h1>Fees</h1>");
        assert_eq!(cached.header("content-type"), Some("text/html"));
        assert_eq!(cached.header("set-cookie"), None);
        assert!(buckets.get("outbox-v2", "GET /fees").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_entry() {
        let buckets = buckets();
        buckets
            .put("b", "GET /a", &NetResponse::new(200, "text/css", "old"))
            .await
            .unwrap();
        buckets
            .put("b", "GET /a", &NetResponse::new(200, "text/css", "new"))
            .await
            .unwrap();

        assert_eq!(buckets.entry_count("b").await.unwrap(), 1);
        assert_eq!(buckets.get("b", "GET /a").await.unwrap().unwrap().text(), "new");
    }

    #[tokio::test]
    async fn test_delete_except() {
        let buckets = buckets();
        let page = NetResponse::new(200, "text/html", "x");
        for bucket in ["outbox-v1", "outbox-v2", "legacy"] {
            buckets.put(bucket, "GET /", &page).await.unwrap();
        }

        let dropped = buckets.delete_except("outbox-v2").await.unwrap();
        assert_eq!(dropped, vec!["legacy".to_string(), "outbox-v1".to_string()]);
        assert_eq!(buckets.bucket_names().await.unwrap(), vec!["outbox-v2".to_string()]);
    }
}
