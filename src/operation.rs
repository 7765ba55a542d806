//! Queued Operation Model
//!
//! A `QueuedOperation` is the immutable snapshot of a form submission captured
//! while offline. It carries everything needed to rebuild the original request
//! at replay time, including the idempotency token the server deduplicates on.

use crate::error::{OutboxError, OutboxResult};
use crate::network::{OutboundRequest, RequestBody};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Form field carrying the idempotency token in every replayed request.
pub const REQUEST_ID_FIELD: &str = "__offline_request_id";

/// Opaque unique token identifying a queued operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body shape the operation is replayed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    UrlEncoded,
    Multipart,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::UrlEncoded => "urlencoded",
            Encoding::Multipart => "multipart",
        }
    }
}

impl FromStr for Encoding {
    type Err = OutboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "urlencoded" => Ok(Encoding::UrlEncoded),
            "multipart" => Ok(Encoding::Multipart),
            other => Err(OutboxError::InvalidRequest(format!(
                "unknown encoding '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file captured with a multipart operation, held as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub field: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl FileAttachment {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A write captured offline, waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedOperation {
    pub id: OperationId,
    pub target_url: String,
    pub method: String,
    pub encoding: Encoding,
    /// Ordered field pairs, idempotency token included.
    pub fields: Vec<(String, String)>,
    pub files: Vec<FileAttachment>,
    pub created_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Build a url-encoded operation. The generated id is appended as the last field.
    pub fn url_encoded(target_url: &str, method: &str, fields: Vec<(String, String)>) -> Self {
        Self::build(target_url, method, Encoding::UrlEncoded, fields, Vec::new())
    }

    /// Build a multipart operation carrying the given attachments.
    pub fn multipart(
        target_url: &str,
        method: &str,
        fields: Vec<(String, String)>,
        files: Vec<FileAttachment>,
    ) -> Self {
        Self::build(target_url, method, Encoding::Multipart, fields, files)
    }

    fn build(
        target_url: &str,
        method: &str,
        encoding: Encoding,
        mut fields: Vec<(String, String)>,
        files: Vec<FileAttachment>,
    ) -> Self {
        let id = OperationId::generate();
        fields.retain(|(key, _)| key != REQUEST_ID_FIELD);
        fields.push((REQUEST_ID_FIELD.to_string(), id.to_string()));

        Self {
            id,
            target_url: target_url.to_string(),
            method: method.to_ascii_uppercase(),
            encoding,
            fields,
            files,
            created_at: Utc::now(),
        }
    }

    pub fn attachment_bytes(&self) -> u64 {
        self.files.iter().map(FileAttachment::len).sum()
    }

    /// Serialize the field pairs as an `application/x-www-form-urlencoded` body.
    pub fn url_encoded_body(&self) -> OutboxResult<String> {
        serde_urlencoded::to_string(&self.fields)
            .map_err(|e| OutboxError::InvalidRequest(format!("cannot encode fields: {}", e)))
    }

    /// Rebuild the request this operation stands for.
    ///
    /// GET submissions carry their fields in the query string, like a browser
    /// would send them; attachments are only ever sent in a multipart body.
    pub fn replay_request(&self) -> OutboxResult<OutboundRequest> {
        if self.method == "GET" {
            let query = self.url_encoded_body()?;
            let separator = if self.target_url.contains('?') { '&' } else { '?' };
            return Ok(OutboundRequest {
                method: self.method.clone(),
                url: format!("{}{}{}", self.target_url, separator, query),
                headers: Vec::new(),
                body: RequestBody::Empty,
            });
        }

        let body = match self.encoding {
            Encoding::UrlEncoded => RequestBody::UrlEncoded(self.url_encoded_body()?),
            Encoding::Multipart => RequestBody::Multipart {
                fields: self.fields.clone(),
                files: self.files.clone(),
            },
        };

        Ok(OutboundRequest {
            method: self.method.clone(),
            url: self.target_url.clone(),
            headers: Vec::new(),
            body,
        })
    }
}
