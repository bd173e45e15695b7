//! GitHub infrastructure adapter.
//!
//! Implements [`pipeline::UpstreamRanges`] with [`GitHubMeta`]: the address
//! ranges GitHub delivers webhooks from, read from the `hooks` member of the
//! public meta API (`https://api.github.com/meta`).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport and response parsing live here. The
//! [`pipeline`] crate sees only [`pipeline::UpstreamRanges`].
//!
//! ## Caching
//!
//! One [`GitHubMeta`] is created per process and passed by reference into
//! registry construction. The first request fetches the list; every later
//! request is served from cache until [`GitHubMeta::refresh`] is called.

use async_trait::async_trait;
use ipnet::IpNet;
use pipeline::{UpstreamRanges, UpstreamUnavailable};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Public GitHub meta API endpoint.
pub const DEFAULT_META_URL: &str = "https://api.github.com/meta";

/// GitHub rejects API requests without a user agent.
const USER_AGENT: &str = concat!("hookd/", env!("CARGO_PKG_VERSION"));

/// Failure to obtain the hook ranges.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Transport failure or undecodable body.
    #[error("Meta API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("Meta API returned HTTP {0}")]
    Status(u16),

    /// A published block is not valid CIDR notation.
    #[error("Meta API returned an invalid network block {block}: {source}")]
    InvalidRange {
        /// The offending block.
        block: String,
        /// Parse error.
        source: ipnet::AddrParseError,
    },
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    hooks: Vec<String>,
}

/// Process-wide cache of GitHub's webhook source ranges.
///
/// `None` in the cache means "not fetched yet".
#[derive(Debug)]
pub struct GitHubMeta {
    client: reqwest::Client,
    url: String,
    ranges: RwLock<Option<Vec<IpNet>>>,
}

impl GitHubMeta {
    /// Creates an uninitialised cache reading from `url`.
    pub fn new(url: impl Into<String>) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            ranges: RwLock::new(None),
        })
    }

    /// The meta API URL this cache reads from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns `true` once a fetch has succeeded.
    pub async fn is_initialized(&self) -> bool {
        self.ranges.read().await.is_some()
    }

    /// The cached ranges, without fetching.
    pub async fn cached(&self) -> Option<Vec<IpNet>> {
        self.ranges.read().await.clone()
    }

    /// Returns the cached ranges, fetching them on first use.
    ///
    /// Concurrent first callers share one fetch.
    pub async fn ranges(&self) -> Result<Vec<IpNet>, UpstreamError> {
        if let Some(ranges) = self.ranges.read().await.as_ref() {
            return Ok(ranges.clone());
        }

        let mut slot = self.ranges.write().await;
        if let Some(ranges) = slot.as_ref() {
            return Ok(ranges.clone());
        }

        let fetched = self.fetch().await?;
        *slot = Some(fetched.clone());
        Ok(fetched)
    }

    /// Refetches the ranges and replaces the cache.
    ///
    /// On failure the previous cache is kept.
    pub async fn refresh(&self) -> Result<Vec<IpNet>, UpstreamError> {
        let fetched = self.fetch().await?;
        *self.ranges.write().await = Some(fetched.clone());
        Ok(fetched)
    }

    async fn fetch(&self) -> Result<Vec<IpNet>, UpstreamError> {
        debug!(url = %self.url, "downloading GitHub hook ranges");

        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(url = %self.url, status = status.as_u16(), "meta API request rejected");
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let meta: MetaResponse = response.json().await?;
        let ranges = meta
            .hooks
            .into_iter()
            .map(|block| {
                block
                    .parse::<IpNet>()
                    .map_err(|source| UpstreamError::InvalidRange { block, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = ranges.len(), "GitHub hook ranges loaded");
        Ok(ranges)
    }
}

#[async_trait]
impl UpstreamRanges for GitHubMeta {
    async fn hook_ranges(&self) -> Result<Vec<IpNet>, UpstreamUnavailable> {
        self.ranges().await.map_err(|e| {
            warn!(error = %e, "GitHub hook ranges unavailable");
            UpstreamUnavailable(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn meta_server(body: serde_json::Value, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/meta"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetches_once_then_serves_cache() {
        let server = meta_server(
            json!({"hooks": ["192.30.252.0/22", "2a0a:a440::/29"], "web": ["1.2.3.4/32"]}),
            1,
        )
        .await;
        let meta = GitHubMeta::new(format!("{}/meta", server.uri())).unwrap();

        assert!(!meta.is_initialized().await);
        let first = meta.ranges().await.unwrap();
        let second = meta.hook_ranges().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert!(meta.is_initialized().await);
    }

    #[tokio::test]
    async fn test_refresh_refetches() {
        let server = meta_server(json!({"hooks": ["192.30.252.0/22"]}), 2).await;
        let meta = GitHubMeta::new(format!("{}/meta", server.uri())).unwrap();

        meta.ranges().await.unwrap();
        meta.refresh().await.unwrap();

        assert_eq!(meta.cached().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_status_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let meta = GitHubMeta::new(format!("{}/meta", server.uri())).unwrap();

        assert!(matches!(meta.ranges().await, Err(UpstreamError::Status(503))));
        assert!(meta.hook_ranges().await.is_err());
        assert!(!meta.is_initialized().await);
    }

    #[tokio::test]
    async fn test_invalid_block_is_rejected() {
        let server = meta_server(json!({"hooks": ["not-a-network"]}), 1).await;
        let meta = GitHubMeta::new(format!("{}/meta", server.uri())).unwrap();

        assert!(matches!(
            meta.ranges().await,
            Err(UpstreamError::InvalidRange { block, .. }) if block == "not-a-network"
        ));
    }
}
