//! Cache Manager
//!
//! Read-path policies for offline navigation:
//! - navigable pages in the offline route set are **network-first**, falling
//!   back to the last cached copy and then to a built-in placeholder
//! - static assets are **cache-first**, refreshed in the background
//! - everything else goes straight to the network
//!
//! Responses live in one versioned bucket (`<name>-v<version>`); `activate`
//! drops every other bucket.

pub mod buckets;

pub use buckets::CacheBuckets;

use crate::connectivity::Connectivity;
use crate::error::{OutboxError, OutboxResult};
use crate::network::{NetResponse, Network, OutboundRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Served when a navigable page is neither reachable nor cached.
pub const OFFLINE_PAGE: &str = "<!DOCTYPE html>
<html>
<head><meta charset=\"utf-8\"><title>Offline</title></head>
<body>
<h1>You are offline</h1>
<p>This page has not been saved for offline use. Changes you submit are kept on this device and sent when the connection returns.</p>
</body>
</html>
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub name: String,
    pub version: u32,
    /// Navigable routes served network-first. A trailing `*` matches a prefix.
    pub offline_routes: Vec<String>,
    pub asset_prefixes: Vec<String>,
    /// App-shell URLs fetched by `install`.
    pub precache: Vec<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            name: "outbox".to_string(),
            version: 1,
            offline_routes: vec!["/".to_string()],
            asset_prefixes: vec!["/assets/".to_string()],
            precache: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn bucket(&self) -> String {
        format!("{}-v{}", self.name, self.version)
    }
}

/// Request destination, as a browser would label it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Document,
    Script,
    Style,
    Font,
    Image,
    Other,
}

impl Destination {
    /// Guess from the path's extension; extension-less paths are documents.
    pub fn infer(url: &str) -> Self {
        let path = path_of(url);
        let file = path.rsplit('/').next().unwrap_or("");
        let Some((_, ext)) = file.rsplit_once('.') else {
            return Destination::Document;
        };
        match ext.to_ascii_lowercase().as_str() {
            "html" | "htm" => Destination::Document,
            "js" | "mjs" => Destination::Script,
            "css" => Destination::Style,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Destination::Font,
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "ico" => Destination::Image,
            _ => Destination::Other,
        }
    }

    pub fn is_asset(self) -> bool {
        matches!(
            self,
            Destination::Script | Destination::Style | Destination::Font | Destination::Image
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRequest {
    pub method: String,
    pub url: String,
    pub destination: Destination,
}

impl CacheRequest {
    pub fn navigate(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            destination: Destination::Document,
        }
    }

    pub fn asset(url: &str, destination: Destination) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            destination,
        }
    }

    /// A GET whose destination is inferred from the URL.
    pub fn get(url: &str) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.to_string(),
            destination: Destination::infer(url),
        }
    }

    /// Exact-request cache key.
    pub fn key(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.url)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    NetworkOnly,
}

/// Strip scheme, host, query and fragment.
fn path_of(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(i) => {
            let after = &url[i + 3..];
            after.find('/').map(|j| &after[j..]).unwrap_or("/")
        }
        None => url,
    };
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    &rest[..end]
}

fn route_matches(route: &str, path: &str) -> bool {
    match route.strip_suffix('*') {
        Some(prefix) => path.starts_with(prefix),
        None => route == path,
    }
}

pub fn classify(request: &CacheRequest, settings: &CacheSettings) -> Strategy {
    if !request.method.eq_ignore_ascii_case("GET") {
        return Strategy::NetworkOnly;
    }

    let path = path_of(&request.url);
    if request.destination.is_asset()
        || settings
            .asset_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return Strategy::CacheFirst;
    }

    if request.destination == Destination::Document
        && settings
            .offline_routes
            .iter()
            .any(|route| route_matches(route, path))
    {
        return Strategy::NetworkFirst;
    }

    Strategy::NetworkOnly
}

#[derive(Clone)]
pub struct CacheManager {
    buckets: CacheBuckets,
    network: Arc<dyn Network>,
    settings: Arc<CacheSettings>,
    connectivity: Connectivity,
}

impl CacheManager {
    pub fn new(
        buckets: CacheBuckets,
        network: Arc<dyn Network>,
        settings: CacheSettings,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            buckets,
            network,
            settings: Arc::new(settings),
            connectivity,
        }
    }

    pub fn current_bucket(&self) -> String {
        self.settings.bucket()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub async fn fetch(&self, request: &CacheRequest) -> OutboxResult<NetResponse> {
        let strategy = classify(request, &self.settings);
        debug!("{} {} -> {:?}", request.method, request.url, strategy);

        match strategy {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkOnly => self.network.send(outbound(request)).await,
        }
    }

    async fn network_first(&self, request: &CacheRequest) -> OutboxResult<NetResponse> {
        let bucket = self.current_bucket();
        let key = request.key();

        if self.connectivity.is_online() {
            match self.network.send(outbound(request)).await {
                Ok(response) => {
                    if response.is_success() {
                        if let Err(e) = self.buckets.put(&bucket, &key, &response).await {
                            warn!("Failed to cache {}: {}", request.url, e);
                        }
                    }
                    return Ok(response);
                }
                Err(e) => debug!("Network failed for {}, trying cache: {}", request.url, e),
            }
        }

        match self.buckets.get(&bucket, &key).await {
            Ok(Some(cached)) => Ok(cached),
            Ok(None) => Ok(offline_page()),
            Err(e) => {
                warn!("Cache lookup failed for {}: {}", request.url, e);
                Ok(offline_page())
            }
        }
    }

    async fn cache_first(&self, request: &CacheRequest) -> OutboxResult<NetResponse> {
        let bucket = self.current_bucket();

        let cached = match self.buckets.get(&bucket, &request.key()).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cache lookup failed for {}, going to network: {}", request.url, e);
                None
            }
        };
        if let Some(cached) = cached {
            if self.connectivity.is_online() {
                let this = self.clone();
                let request = request.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.refresh(&request).await {
                        debug!("Background refresh of {} failed: {}", request.url, e);
                    }
                });
            }
            return Ok(cached);
        }

        let response = self.network.send(outbound(request)).await?;
        if response.is_success() {
            if let Err(e) = self.buckets.put(&bucket, &request.key(), &response).await {
                warn!("Failed to cache {}: {}", request.url, e);
            }
        }
        Ok(response)
    }

    /// Fetch from the network and store a 2xx answer in the current bucket.
    pub async fn refresh(&self, request: &CacheRequest) -> OutboxResult<()> {
        let response = self.network.send(outbound(request)).await?;
        if !response.is_success() {
            return Err(OutboxError::NetworkError(format!(
                "HTTP {} for {}",
                response.status, request.url
            )));
        }
        self.buckets
            .put(&self.current_bucket(), &request.key(), &response)
            .await
    }

    /// Precache URLs into the current bucket. Failures are logged, not fatal.
    pub async fn install(&self, urls: &[String]) -> usize {
        let mut stored = 0;
        for url in urls {
            match self.refresh(&CacheRequest::get(url)).await {
                Ok(()) => stored += 1,
                Err(e) => warn!("Precache of {} failed: {}", url, e),
            }
        }
        info!("Precached {}/{} URLs into {}", stored, urls.len(), self.current_bucket());
        stored
    }

    /// Delete every bucket other than the current one.
    pub async fn activate(&self) -> OutboxResult<Vec<String>> {
        let dropped = self.buckets.delete_except(&self.current_bucket()).await?;
        if !dropped.is_empty() {
            info!("Dropped stale cache buckets: {}", dropped.join(", "));
        }
        Ok(dropped)
    }
}

fn outbound(request: &CacheRequest) -> OutboundRequest {
    OutboundRequest {
        method: request.method.to_uppercase(),
        url: request.url.clone(),
        headers: Vec::new(),
        body: crate::network::RequestBody::Empty,
    }
}

fn offline_page() -> NetResponse {
    NetResponse::new(503, "text/html; charset=utf-8", OFFLINE_PAGE)
}
