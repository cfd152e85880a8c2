//! Summarize command implementation

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::enrich::{summarize_item, summarize_pending, ChatSummarizer, SummarizeStats};
use crate::error::Result;
use crate::models::Item;

/// Summarize pending items with the configured chat model
pub async fn cmd_summarize(
    config: &Config,
    store: &ArchiveStore,
    limit: Option<usize>,
) -> Result<SummarizeStats> {
    let summarizer = ChatSummarizer::from_config(config)?;
    summarize_pending(store, &summarizer, limit, true).await
}

/// Summarize one item by id
pub async fn cmd_summarize_item(
    config: &Config,
    store: &ArchiveStore,
    item_id: &str,
) -> Result<Item> {
    let summarizer = ChatSummarizer::from_config(config)?;
    summarize_item(store, &summarizer, item_id).await
}

/// Print a freshly summarized item
pub fn print_summarized_item(item: &Item) {
    println!("\n📝 {}\n", item.title);
    println!("{}", item.link);
    if let Some(summary) = &item.summary {
        println!("\n{}", summary);
    }
}
