//! Fetchers: pull raw entries from a source without touching the archive
//!
//! This module provides:
//! - A shared HTTP client with a request timeout and per-host pacing
//! - The RSS/Atom fetcher
//! - The single-page webpage fetcher
//!
//! Fetchers never retry. A failed request surfaces as [`Error::Fetch`] and the
//! run coordinator decides what to do with it.

mod rate_limit;
mod rss;
mod webpage;

pub use rate_limit::*;
pub use rss::*;
pub use webpage::*;

use crate::config::FetchConfig;
use crate::error::{Error, Result};
use crate::registry::{SourceKind, SourceSpec};
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One entry as the upstream presented it
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub body: String,
}

/// Result of one successful fetch
#[derive(Debug, Clone)]
pub struct FetchOutput {
    /// Entries in upstream order
    pub entries: Vec<RawEntry>,
    /// Entries that were present but unusable
    pub soft_failures: usize,
    pub fetched_at: DateTime<Utc>,
}

impl FetchOutput {
    pub fn new(entries: Vec<RawEntry>, soft_failures: usize) -> Self {
        Self {
            entries,
            soft_failures,
            fetched_at: Utc::now(),
        }
    }

    /// Most recent publish time among the entries
    pub fn latest_published(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().filter_map(|e| e.published_at).max()
    }
}

/// HTTP client shared by both fetchers
#[derive(Clone)]
pub struct FetchClient {
    client: Client,
    pacer: HostRateLimiter,
}

impl FetchClient {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            pacer: HostRateLimiter::new(config.rate_limit_per_host),
        })
    }

    /// GET a URL as text. Every failure is reported as a fetch error for
    /// `source_id`.
    pub async fn get_text(&self, source_id: &str, url: &str) -> Result<String> {
        let parsed = Url::parse(url).map_err(|e| Error::fetch(source_id, e))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| Error::fetch(source_id, "URL has no host"))?
            .to_string();

        self.pacer.wait(&host).await;

        debug!(source_id, url, "Fetching");

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Error::fetch(source_id, describe_request_error(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(source_id, format!("HTTP {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| Error::fetch(source_id, describe_request_error(&e)))
    }
}

fn describe_request_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {}", err)
    } else if err.is_connect() {
        format!("connection failed: {}", err)
    } else {
        err.to_string()
    }
}

/// Dispatch over the closed set of source kinds
#[derive(Clone)]
pub struct Fetchers {
    rss: RssFetcher,
    webpage: WebpageFetcher,
}

impl Fetchers {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = FetchClient::new(config)?;
        Ok(Self {
            rss: RssFetcher::new(client.clone()),
            webpage: WebpageFetcher::new(client),
        })
    }

    pub async fn fetch(&self, source: &SourceSpec) -> Result<FetchOutput> {
        match source.kind {
            SourceKind::Rss => self.rss.fetch(source).await,
            SourceKind::Webpage => self.webpage.fetch(source).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::FetchConfig;
    use crate::registry::{SourceKind, SourceSpec};

    pub fn fast_config() -> FetchConfig {
        FetchConfig {
            timeout_secs: 2,
            rate_limit_per_host: 1000.0,
            ..FetchConfig::default()
        }
    }

    pub fn spec(id: &str, kind: SourceKind, locator: String) -> SourceSpec {
        SourceSpec {
            id: id.to_string(),
            followee_id: "minimax".to_string(),
            kind,
            locator,
            name: None,
            cadence: None,
        }
    }
}
