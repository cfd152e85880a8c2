//! RSS / Atom fetcher

use super::{FetchClient, FetchOutput, RawEntry};
use crate::error::{Error, Result};
use crate::parse::extract_text_from_html;
use crate::registry::SourceSpec;
use feed_rs::model::{Entry, Text};
use feed_rs::parser;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RssFetcher {
    client: FetchClient,
}

impl RssFetcher {
    pub fn new(client: FetchClient) -> Self {
        Self { client }
    }

    /// Fetch and parse a feed. An unparseable document is fatal for the
    /// source; an entry without a usable link is skipped and counted.
    pub async fn fetch(&self, source: &SourceSpec) -> Result<FetchOutput> {
        let body = self.client.get_text(&source.id, &source.locator).await?;
        parse_feed(&source.id, body.as_bytes())
    }
}

/// Parse feed bytes into raw entries
pub fn parse_feed(source_id: &str, bytes: &[u8]) -> Result<FetchOutput> {
    let feed = parser::parse(bytes)
        .map_err(|e| Error::fetch(source_id, format!("unparseable feed: {}", e)))?;

    let mut entries = Vec::with_capacity(feed.entries.len());
    let mut soft_failures = 0;

    for entry in feed.entries {
        match convert_entry(entry) {
            Ok(raw) => entries.push(raw),
            Err(e) => {
                warn!(source_id, error = %e, "Skipping malformed feed entry");
                soft_failures += 1;
            }
        }
    }

    debug!(source_id, entries = entries.len(), soft_failures, "Parsed feed");
    Ok(FetchOutput::new(entries, soft_failures))
}

fn convert_entry(entry: Entry) -> Result<RawEntry> {
    let link = select_entry_link(&entry)
        .ok_or_else(|| Error::Parse(format!("entry '{}' has no link", entry.id)))?;

    let body = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .filter(|b| !b.trim().is_empty())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))
        .map(|b| plain_text(&b))
        .unwrap_or_default();

    Ok(RawEntry {
        title: entry.title.as_ref().map(text_content),
        link,
        published_at: entry.published.or(entry.updated),
        body,
    })
}

fn select_entry_link(entry: &Entry) -> Option<String> {
    let usable = |href: &str| !href.trim().is_empty();

    entry
        .links
        .iter()
        .find(|l| usable(&l.href) && matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.iter().find(|l| usable(&l.href)))
        .map(|l| l.href.trim().to_string())
}

fn text_content(text: &Text) -> String {
    if text.content_type.essence().to_string() == "text/html" {
        plain_text(&text.content)
    } else {
        text.content.clone()
    }
}

fn plain_text(raw: &str) -> String {
    if raw.contains('<') {
        extract_text_from_html(raw)
    } else {
        raw.to_string()
    }
}
