//! Offline Sync Module
//!
//! Replay of the durable outbox and the event routing around it.
//!
//! # Example
//!
//! ```rust,ignore
//! use outbox::{HttpNetwork, Outbox, OutboxOptions, PageEvent, SqliteStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open_at("outbox.db".as_ref())?);
//! let network = Arc::new(HttpNetwork::new(Some("https://school.example"), None)?);
//! let outbox = Outbox::new(Some(store), network, OutboxOptions::default());
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(32);
//! tx.send(PageEvent::ManualSync).await?;
//! outbox.run(rx).await;
//! ```

pub mod dispatcher;
pub mod engine;

pub use dispatcher::{Outbox, OutboxOptions, PageEvent};
pub use engine::{EngineConfig, Halt, SkipReason, SyncEngine, SyncOutcome, SyncReport};
