//! Network seam shared by the sync engine, the cache manager and the
//! connectivity probe.
//!
//! `HttpNetwork` is the reqwest-backed implementation. Relative URLs (form
//! actions such as `/fees/pay`) are resolved against the configured origin and
//! every request carries the ambient credentials cookie.

use crate::error::{OutboxError, OutboxResult};
use crate::operation::FileAttachment;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, COOKIE};
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    UrlEncoded(String),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<FileAttachment>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl OutboundRequest {
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl NetResponse {
    pub fn new(status: u16, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Anything able to deliver a request and hand back the full response.
///
/// Transport failures are errors; HTTP error statuses are ordinary responses.
#[async_trait]
pub trait Network: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> OutboxResult<NetResponse>;
}

pub struct HttpNetwork {
    base_url: Option<Url>,
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(base_url: Option<&str>, credentials: Option<&str>) -> OutboxResult<Self> {
        let base_url = base_url
            .map(|raw| {
                Url::parse(raw).map_err(|e| {
                    OutboxError::ConfigError(format!("invalid base URL '{}': {}", raw, e))
                })
            })
            .transpose()?;

        let mut headers = HeaderMap::new();
        if let Some(cookie) = credentials {
            let mut value = HeaderValue::from_str(cookie).map_err(|e| {
                OutboxError::ConfigError(format!("invalid credentials cookie: {}", e))
            })?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| OutboxError::NetworkError(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    /// Resolve a possibly relative URL against the configured origin.
    pub fn resolve(&self, url: &str) -> OutboxResult<Url> {
        let resolved = match &self.base_url {
            Some(base) => base.join(url),
            None => Url::parse(url),
        };
        resolved.map_err(|e| OutboxError::InvalidRequest(format!("bad URL '{}': {}", url, e)))
    }
}

fn multipart_form(fields: Vec<(String, String)>, files: Vec<FileAttachment>) -> OutboxResult<Form> {
    let mut form = Form::new();
    for (key, value) in fields {
        form = form.text(key, value);
    }
    for file in files {
        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.mime_type)
            .map_err(|e| {
                OutboxError::InvalidRequest(format!("bad MIME type '{}': {}", file.mime_type, e))
            })?;
        form = form.part(file.field, part);
    }
    Ok(form)
}

#[async_trait]
impl Network for HttpNetwork {
    async fn send(&self, request: OutboundRequest) -> OutboxResult<NetResponse> {
        let url = self.resolve(&request.url)?;
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            OutboxError::InvalidRequest(format!("bad HTTP method '{}'", request.method))
        })?;

        let mut builder = self.client.request(method, url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::UrlEncoded(body) => builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body),
            RequestBody::Multipart { fields, files } => {
                builder.multipart(multipart_form(fields, files)?)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| OutboxError::NetworkError(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| OutboxError::NetworkError(format!("Failed to read response: {}", e)))?
            .to_vec();

        Ok(NetResponse {
            status,
            headers,
            body,
        })
    }
}
