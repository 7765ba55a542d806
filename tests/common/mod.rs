//! Common test utilities for outbox integration tests
//!
//! Provides:
//! - `FakeServer`, an in-process axum server that records every request and
//!   can be told to fail specific writes
//! - `BrokenStore`, an outbox store whose storage is never available
//! - helpers for building an `Outbox` against a database file

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use outbox::{
    FormConfig, FormSubmission, HttpNetwork, OperationId, Outbox, OutboxError, OutboxOptions,
    OutboxResult, OutboxStore, QueuedOperation, SqliteStore,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub content_type: String,
    pub cookie: Option<String>,
    pub body: Vec<u8>,
    pub status: u16,
}

impl Recorded {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Default)]
struct ServerState {
    requests: Mutex<Vec<Recorded>>,
    writes_seen: AtomicUsize,
    failing_writes: Mutex<HashSet<usize>>,
    pages: Mutex<HashMap<String, String>>,
}

pub struct FakeServer {
    pub origin: String,
    state: Arc<ServerState>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let state = Arc::new(ServerState::default());
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake server");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            origin: format!("http://{}", addr),
            state,
        }
    }

    /// Answer the n-th write (1-based, counted across the server's life) with a 500.
    pub fn fail_write(&self, n: usize) {
        self.state.failing_writes.lock().unwrap().insert(n);
    }

    pub fn serve_page(&self, path: &str, html: &str) {
        self.state
            .pages
            .lock()
            .unwrap()
            .insert(path.to_string(), html.to_string());
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Writes the server accepted with a 2xx, in arrival order.
    pub fn accepted_writes(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != "GET" && r.status < 300)
            .collect()
    }

    pub fn network(&self) -> Arc<HttpNetwork> {
        Arc::new(HttpNetwork::new(Some(&self.origin), Some("session=test")).unwrap())
    }
}

async fn record(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let (status, reply) = if method == Method::GET {
        match state.pages.lock().unwrap().get(&path) {
            Some(html) => (StatusCode::OK, html.clone()),
            None => (StatusCode::NOT_FOUND, "not found".to_string()),
        }
    } else {
        let n = state.writes_seen.fetch_add(1, Ordering::SeqCst) + 1;
        if state.failing_writes.lock().unwrap().contains(&n) {
            (StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string())
        } else {
            (StatusCode::OK, "saved".to_string())
        }
    };

    let header_str = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(Recorded {
        method: method.to_string(),
        path,
        content_type: header_str(header::CONTENT_TYPE).unwrap_or_default(),
        cookie: header_str(header::COOKIE),
        body: body.to_vec(),
        status: status.as_u16(),
    });

    (status, [(header::CONTENT_TYPE, "text/html")], reply).into_response()
}

/// An origin nothing listens on, so every request fails at the transport.
pub async fn dead_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Store that fails every call and counts write attempts.
#[derive(Default)]
pub struct BrokenStore {
    pub puts: AtomicUsize,
}

#[async_trait]
impl OutboxStore for BrokenStore {
    async fn put(&self, _operation: &QueuedOperation) -> OutboxResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(OutboxError::StorageUnavailable("quota exceeded".to_string()))
    }

    async fn get_all(&self) -> OutboxResult<Vec<QueuedOperation>> {
        Err(OutboxError::StorageUnavailable("quota exceeded".to_string()))
    }

    async fn delete(&self, _id: &OperationId) -> OutboxResult<()> {
        Err(OutboxError::StorageUnavailable("quota exceeded".to_string()))
    }

    async fn count(&self) -> OutboxResult<usize> {
        Err(OutboxError::StorageUnavailable("quota exceeded".to_string()))
    }
}

pub fn open_outbox(db_path: &Path, server: &FakeServer, online: bool) -> (Outbox, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::open_at(db_path).expect("Failed to open store"));
    let outbox = Outbox::new(
        Some(store.clone() as Arc<dyn OutboxStore>),
        server.network(),
        OutboxOptions {
            initially_online: online,
            ..OutboxOptions::default()
        },
    );
    (outbox, store)
}

pub fn receipt_form(n: usize) -> FormSubmission {
    FormSubmission::new("/fees/pay", FormConfig::eligible())
        .field("receipt", &n.to_string())
        .field("amount", "100")
}
