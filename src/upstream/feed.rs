use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A rate-limited upstream data source returning JSON documents.
#[async_trait]
pub trait UpstreamFeed: Send + Sync {
    /// Fetch the document for `key` (a path relative to the feed root).
    async fn fetch(&self, key: &str) -> Result<serde_json::Value>;

    /// Name used for logging and as the rate-budget key.
    fn name(&self) -> &str;
}

/// JSON-over-HTTP feed (odds API, stats API).
pub struct HttpJsonFeed {
    http: Client,
    name: String,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpJsonFeed {
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        // Trailing slash so `join` appends instead of replacing the last segment
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&base).with_context(|| format!("Invalid feed URL: {base_url}"))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("Feed URL must be http(s): {}", base_url);
        }
        Ok(Self {
            http,
            name: name.to_string(),
            base_url,
            api_key: api_key.map(str::to_string),
        })
    }

    pub fn url_for(&self, key: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(key.trim_start_matches('/'))
            .with_context(|| format!("Invalid feed key: {key}"))?;
        if let Some(api_key) = &self.api_key {
            url.query_pairs_mut().append_pair("apiKey", api_key);
        }
        Ok(url)
    }
}

#[async_trait]
impl UpstreamFeed for HttpJsonFeed {
    async fn fetch(&self, key: &str) -> Result<serde_json::Value> {
        let url = self.url_for(key)?;
        debug!("Fetching {} from {}", key, self.name);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("{} request failed", self.name))?;

        if !resp.status().is_success() {
            anyhow::bail!("{} error: {}", self.name, resp.status());
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.name))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reads `<dir>/<key>.json`; stands in for a live feed when the collector
/// drops files on disk.
pub struct FileFeed {
    name: String,
    dir: PathBuf,
}

impl FileFeed {
    pub fn new(name: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("Invalid feed key: {key}");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl UpstreamFeed for FileFeed {
    async fn fetch(&self, key: &str) -> Result<serde_json::Value> {
        let path = self.path_for(key)?;
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
