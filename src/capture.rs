//! Submission Interceptor
//!
//! Turns an offline form submission into a `QueuedOperation`, persists it and
//! tells the caller to suppress the live request. Online submissions, and
//! forms that never opted in, pass through untouched.

use crate::connectivity::Connectivity;
use crate::error::{OutboxError, OutboxResult};
use crate::operation::{FileAttachment, OperationId, QueuedOperation};
use crate::status::{StatusKind, StatusSurface};
use crate::store::OutboxStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Attachment ceiling for file-capable forms that do not declare one (10MB).
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Declarative per-form configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormConfig {
    /// Capture this form when offline. Defaults to true for declared forms.
    #[serde(default = "default_true")]
    pub sync_eligible: bool,
    /// Allow attachments to be queued.
    #[serde(default)]
    pub file_capable: bool,
    /// Attachment ceiling in bytes.
    #[serde(default)]
    pub max_bytes: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for FormConfig {
    fn default() -> Self {
        Self {
            sync_eligible: false,
            file_capable: false,
            max_bytes: None,
        }
    }
}

impl FormConfig {
    pub fn eligible() -> Self {
        Self {
            sync_eligible: true,
            ..Self::default()
        }
    }

    pub fn with_files(max_bytes: Option<u64>) -> Self {
        Self {
            sync_eligible: true,
            file_capable: true,
            max_bytes,
        }
    }

    pub fn byte_ceiling(&self) -> u64 {
        self.max_bytes.unwrap_or(DEFAULT_MAX_BYTES)
    }
}

/// Where a selected file's content comes from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub source: FileSource,
}

impl SelectedFile {
    /// A file input with nothing chosen submits an empty, unnamed entry.
    /// Empty file inputs count as absent, same rule as the attachment read.
    pub async fn is_selected(&self) -> bool {
        match &self.source {
            FileSource::Bytes(bytes) => !bytes.is_empty(),
            // Unreadable paths count as selected so the read reports the error
            FileSource::Path(path) => tokio::fs::metadata(path)
                .await
                .map(|meta| meta.len() > 0)
                .unwrap_or(true),
        }
    }

    async fn read(&self) -> OutboxResult<FileAttachment> {
        let bytes = match &self.source {
            FileSource::Bytes(bytes) => bytes.clone(),
            FileSource::Path(path) => tokio::fs::read(path).await?,
        };
        Ok(FileAttachment {
            field: self.field.clone(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.clone(),
            bytes,
        })
    }
}

/// A form submission as the host saw it.
#[derive(Debug, Clone)]
pub struct FormSubmission {
    pub action: String,
    pub method: String,
    pub fields: Vec<(String, String)>,
    pub files: Vec<SelectedFile>,
    pub config: FormConfig,
}

impl FormSubmission {
    pub fn new(action: &str, config: FormConfig) -> Self {
        Self {
            action: action.to_string(),
            method: "POST".to_string(),
            fields: Vec::new(),
            files: Vec::new(),
            config,
        }
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn field(mut self, key: &str, value: &str) -> Self {
        self.fields.push((key.to_string(), value.to_string()));
        self
    }

    pub fn file(mut self, field: &str, file_name: &str, mime_type: &str, source: FileSource) -> Self {
        self.files.push(SelectedFile {
            field: field.to_string(),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            source,
        });
        self
    }

    async fn has_files(&self) -> bool {
        for file in &self.files {
            if file.is_selected().await {
                return true;
            }
        }
        false
    }
}

/// What the host should do with the submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Let the default submission proceed.
    PassThrough,
    /// No durable storage on this host; the default submission proceeds and
    /// fails naturally if truly offline.
    Unsupported,
    /// Captured; the live submission must be suppressed.
    Queued { id: OperationId, pending: usize },
}

pub struct SubmissionInterceptor {
    store: Option<Arc<dyn OutboxStore>>,
    connectivity: Connectivity,
    status: StatusSurface,
}

impl SubmissionInterceptor {
    pub fn new(
        store: Option<Arc<dyn OutboxStore>>,
        connectivity: Connectivity,
        status: StatusSurface,
    ) -> Self {
        Self {
            store,
            connectivity,
            status,
        }
    }

    /// Decide the fate of a submission.
    ///
    /// Refusals and storage failures are reported on the status surface and
    /// returned; the submission itself is only borrowed so the caller keeps
    /// the user's input intact for a manual retry.
    pub async fn intercept(&self, form: &FormSubmission) -> OutboxResult<Interception> {
        if !form.config.sync_eligible || self.connectivity.is_online() {
            return Ok(Interception::PassThrough);
        }

        let Some(store) = &self.store else {
            warn!("Offline queuing unsupported, letting {} through", form.action);
            self.status.notice("Offline saving is not supported here.", 0);
            return Ok(Interception::Unsupported);
        };

        match self.capture(store.as_ref(), form).await {
            Ok((id, pending)) => {
                info!("Queued offline submission {} to {}", id, form.action);
                self.status.set(StatusKind::Offline, pending);
                Ok(Interception::Queued { id, pending })
            }
            Err(e) => {
                if e.is_capture_refusal() {
                    warn!("Refused offline capture of {}: {}", form.action, e);
                } else {
                    error!("Failed to queue {}: {}", form.action, e);
                }
                let pending = store.count().await.unwrap_or(0);
                self.status.notice(e.user_message(), pending);
                Err(e)
            }
        }
    }

    async fn capture(
        &self,
        store: &dyn OutboxStore,
        form: &FormSubmission,
    ) -> OutboxResult<(OperationId, usize)> {
        let operation = if form.has_files().await {
            if !form.config.file_capable {
                return Err(OutboxError::FileTypeNotQueueable(form.action.clone()));
            }

            let mut files = Vec::with_capacity(form.files.len());
            for selected in &form.files {
                if !selected.is_selected().await {
                    continue;
                }
                let file = selected.read().await?;
                if !file.is_empty() {
                    files.push(file);
                }
            }

            let total: u64 = files.iter().map(FileAttachment::len).sum();
            let limit = form.config.byte_ceiling();
            if total > limit {
                return Err(OutboxError::SizeLimitExceeded {
                    actual: total,
                    limit,
                });
            }

            debug!("Capturing {} files ({} bytes) for {}", files.len(), total, form.action);
            QueuedOperation::multipart(&form.action, &form.method, form.fields.clone(), files)
        } else {
            QueuedOperation::url_encoded(&form.action, &form.method, form.fields.clone())
        };

        store.put(&operation).await?;

        let pending = match store.count().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Queued {} but could not read queue depth: {}", operation.id, e);
                1
            }
        };
        Ok((operation.id, pending))
    }
}
