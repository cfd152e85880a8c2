//! Enrichment collaborators
//!
//! Summarizers read items below `summarized` from the archive and write the
//! summary back. The archive only lets them move status forward and never
//! lets them touch identity fields.

mod chat;

pub use chat::*;

use crate::archive::ArchiveStore;
use crate::error::{Error, Result};
use crate::models::{EnrichmentStatus, Item};
use crate::progress::{advance_progress, finish_progress, start_progress};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Produces summary text for an archived item
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, item: &Item) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Summarization batch statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeStats {
    pub pending: usize,
    pub summarized: usize,
    /// Items with no text to summarize
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Text a summarizer works from: the transcript when there is one, else the
/// archived body
pub fn summary_source(item: &Item) -> Option<&str> {
    [item.transcript.as_deref(), Some(item.content.as_str())]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
}

/// Summarize one item chosen by id, whatever its place in the queue
pub async fn summarize_item(
    store: &ArchiveStore,
    summarizer: &dyn Summarizer,
    item_id: &str,
) -> Result<Item> {
    let item = store
        .get_item(item_id)
        .await?
        .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))?;

    if summary_source(&item).is_none() {
        return Err(Error::Summarize(format!(
            "Item {} has no content to summarize",
            item_id
        )));
    }

    info!(item_id, title = %item.title, model = summarizer.model_name(), "Summarizing item");
    attach(store, summarizer, &item).await
}

async fn attach(store: &ArchiveStore, summarizer: &dyn Summarizer, item: &Item) -> Result<Item> {
    let summary = summarizer.summarize(item).await?;
    if summary.trim().is_empty() {
        return Err(Error::Summarize("empty summary".to_string()));
    }
    store.attach_summary(&item.id, summary.trim()).await
}

/// Summarize items that have not reached `summarized` yet, oldest first.
/// A failing item is recorded and skipped; it stays eligible next time.
pub async fn summarize_pending(
    store: &ArchiveStore,
    summarizer: &dyn Summarizer,
    limit: Option<usize>,
    show_progress: bool,
) -> Result<SummarizeStats> {
    let items = store
        .get_unprocessed_items(EnrichmentStatus::Summarized, limit)
        .await?;

    let mut stats = SummarizeStats {
        pending: items.len(),
        ..Default::default()
    };

    if items.is_empty() {
        info!("No items waiting for a summary");
        return Ok(stats);
    }

    info!(
        count = items.len(),
        model = summarizer.model_name(),
        "Summarizing items"
    );

    let progress = if show_progress {
        start_progress(items.len(), "Summarizing")
    } else {
        None
    };

    for item in &items {
        if summary_source(item).is_none() {
            debug!(item_id = %item.id, "No text to summarize, skipping");
            stats.skipped += 1;
        } else {
            match attach(store, summarizer, item).await {
                Ok(_) => stats.summarized += 1,
                Err(e) => {
                    warn!(item_id = %item.id, "Summarization failed: {}", e);
                    stats.errors.push(format!("{}: {}", item.id, e));
                }
            }
        }
        advance_progress(&progress, None);
    }

    finish_progress(progress, "Summaries attached");
    Ok(stats)
}

/// Print summarization stats to console
pub fn print_summarize_stats(stats: &SummarizeStats) {
    println!("\n📝 Summarization Complete\n");
    println!("Pending items:  {}", stats.pending);
    println!("Summarized:     {}", stats.summarized);
    if stats.skipped > 0 {
        println!("Skipped:        {} (no text)", stats.skipped);
    }

    if !stats.errors.is_empty() {
        println!("\n⚠️  Errors ({}):", stats.errors.len());
        for error in &stats.errors {
            println!("  - {}", error);
        }
    }
}
