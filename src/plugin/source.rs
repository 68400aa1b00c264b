//! Plugin bundle retrieval
//!
//! A plugin id is the base URL of its bundle. Fetching downloads
//! `<id>/manifest.json`, validates it, then downloads `<id>/<main>`.
//! Both requests bypass HTTP caches. A 404 on either is reported as
//! [`FetchFailure::NotFound`]; everything else as [`FetchFailure::Network`].

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::core::error::{FetchFailure, PatchworkError, Result};

use super::types::PluginManifest;

/// A manifest together with the code it points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPlugin {
    pub manifest: PluginManifest,
    pub source: String,
}

/// Where plugin bundles come from
#[async_trait]
pub trait PluginSource: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<FetchedPlugin>;
}

/// Fetches bundles over HTTP(S)
#[derive(Clone)]
pub struct HttpPluginSource {
    client: Client,
}

impl HttpPluginSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PatchworkError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Normalize a plugin id into a directory-style base URL
    pub fn base_url(id: &str) -> Result<Url> {
        let trimmed = id.trim();
        let with_slash = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{}/", trimmed)
        };
        Url::parse(&with_slash).map_err(|e| fetch_error(id, FetchFailure::NotFound, format!("invalid plugin url: {}", e)))
    }

    async fn get_text(&self, id: &str, url: Url) -> Result<String> {
        debug!(plugin = %id, url = %url, "Fetching plugin file");
        let response = self
            .client
            .get(url.clone())
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| fetch_error(id, FetchFailure::Network, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(fetch_error(id, FetchFailure::NotFound, format!("{} returned 404", url)));
        }
        if !status.is_success() {
            return Err(fetch_error(id, FetchFailure::Network, format!("{} returned {}", url, status)));
        }

        response
            .text()
            .await
            .map_err(|e| fetch_error(id, FetchFailure::Network, e.to_string()))
    }
}

#[async_trait]
impl PluginSource for HttpPluginSource {
    async fn fetch(&self, id: &str) -> Result<FetchedPlugin> {
        let base = Self::base_url(id)?;
        let manifest_url = base
            .join("manifest.json")
            .map_err(|e| fetch_error(id, FetchFailure::NotFound, e.to_string()))?;

        let raw = self.get_text(id, manifest_url).await?;
        let manifest: PluginManifest = serde_json::from_str(&raw)
            .map_err(|e| PatchworkError::InvalidManifest(format!("{}: {}", id, e)))?;
        manifest.validate()?;

        let main_url = base
            .join(&manifest.main)
            .map_err(|e| PatchworkError::InvalidManifest(format!("bad main {:?}: {}", manifest.main, e)))?;
        let source = self.get_text(id, main_url).await?;

        if manifest.hash.is_none() {
            debug!(plugin = %id, "Manifest carries no content hash");
        }
        Ok(FetchedPlugin { manifest, source })
    }
}

/// In-memory bundles keyed by plugin id
#[derive(Debug, Default)]
pub struct StaticPluginSource {
    bundles: RwLock<HashMap<String, FetchedPlugin>>,
}

impl StaticPluginSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, manifest: PluginManifest, source: impl Into<String>) {
        self.bundles.write().unwrap_or_else(PoisonError::into_inner).insert(
            id.into(),
            FetchedPlugin {
                manifest,
                source: source.into(),
            },
        );
    }

    pub fn remove(&self, id: &str) -> bool {
        self.bundles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

#[async_trait]
impl PluginSource for StaticPluginSource {
    async fn fetch(&self, id: &str) -> Result<FetchedPlugin> {
        let bundle = self
            .bundles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned();
        match bundle {
            Some(bundle) => {
                bundle.manifest.validate()?;
                Ok(bundle)
            }
            None => {
                warn!(plugin = %id, "No bundle registered");
                Err(fetch_error(id, FetchFailure::NotFound, "no such bundle".to_string()))
            }
        }
    }
}

fn fetch_error(id: &str, kind: FetchFailure, reason: String) -> PatchworkError {
    PatchworkError::PluginFetchFailed {
        id: id.to_string(),
        kind,
        reason,
    }
}
