//! Single-page fetcher

use super::{FetchClient, FetchOutput, RawEntry};
use crate::error::Result;
use crate::parse::extract_page;
use crate::registry::SourceSpec;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct WebpageFetcher {
    client: FetchClient,
}

impl WebpageFetcher {
    pub fn new(client: FetchClient) -> Self {
        Self { client }
    }

    /// Fetch the page at the source locator as a single entry. A page that
    /// yields no text is a soft failure with no entries.
    pub async fn fetch(&self, source: &SourceSpec) -> Result<FetchOutput> {
        let html = self.client.get_text(&source.id, &source.locator).await?;
        let page = extract_page(&html);

        if page.text.is_empty() {
            warn!(source_id = %source.id, "No content extracted from page");
            return Ok(FetchOutput::new(Vec::new(), 1));
        }

        debug!(
            source_id = %source.id,
            chars = page.text.chars().count(),
            "Extracted page text"
        );

        Ok(FetchOutput::new(
            vec![RawEntry {
                title: page.title,
                link: source.locator.clone(),
                published_at: page.published_at,
                body: page.text,
            }],
            0,
        ))
    }
}
