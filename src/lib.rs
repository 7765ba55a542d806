//! # Outbox
//!
//! Durable offline write queue for clients on unreliable networks.
//!
//! Form submissions made while offline are captured into a SQLite-backed
//! outbox and replayed oldest-first once the connection returns. Each replay
//! carries an `__offline_request_id` field so the server can drop duplicates.
//! A pass stops at the first failure and leaves the rest queued in order.
//!
//! Read-only navigation keeps working through the [`cache::CacheManager`]:
//! pages are network-first with a cached fallback, static assets cache-first.
//!
//! ## Example
//!
//! ```rust,ignore
//! use outbox::{FormConfig, FormSubmission, HttpNetwork, Outbox, OutboxOptions, SqliteStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_at("outbox.db".as_ref())?);
//! let network = Arc::new(HttpNetwork::new(Some("https://school.example"), None)?);
//! let outbox = Outbox::new(Some(store), network, OutboxOptions::default());
//!
//! outbox.connectivity().set_online(false);
//! let form = FormSubmission::new("/fees/pay", FormConfig::eligible())
//!     .field("amount", "500")
//!     .field("student_id", "7");
//! outbox.submit(&form).await?;
//! ```

pub mod cache;
pub mod capture;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod network;
pub mod operation;
pub mod status;
pub mod store;
pub mod sync;

pub use cache::{CacheBuckets, CacheManager, CacheRequest, CacheSettings, Destination, Strategy};
pub use capture::{FileSource, FormConfig, FormSubmission, Interception, SubmissionInterceptor};
pub use config::Config;
pub use connectivity::{Connectivity, ConnectivityProbe};
pub use error::{OutboxError, OutboxResult};
pub use network::{HttpNetwork, NetResponse, Network, OutboundRequest, RequestBody};
pub use operation::{Encoding, FileAttachment, OperationId, QueuedOperation, REQUEST_ID_FIELD};
pub use status::{Status, StatusKind, StatusSurface};
pub use store::{Database, OutboxStore, QueueStats, SqliteStore};
pub use sync::{
    EngineConfig, Halt, Outbox, OutboxOptions, PageEvent, SkipReason, SyncEngine, SyncOutcome,
    SyncReport,
};
