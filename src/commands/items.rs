//! Items command implementation

use crate::archive::ArchiveStore;
use crate::error::Result;
use crate::models::{EnrichmentStatus, Item};

/// Items whose status is below `below`, oldest first
pub async fn cmd_list_items(
    store: &ArchiveStore,
    below: EnrichmentStatus,
    limit: Option<usize>,
) -> Result<Vec<Item>> {
    store.get_unprocessed_items(below, limit).await
}

/// Print items to console
pub fn print_items(items: &[Item], below: EnrichmentStatus) {
    println!("\n📰 Items below '{}'\n", below);

    if items.is_empty() {
        println!("Nothing waiting.");
        return;
    }

    for item in items {
        println!("• {} [{}]", item.title, item.status);
        println!("  ID: {}", item.id);
        println!("  Source: {}", item.source_id);
        println!("  Link: {}", item.link);
        println!(
            "  Published: {}",
            item.published_at.as_deref().unwrap_or("unknown")
        );
        println!("  First seen: {}", item.first_seen_at);
        println!();
    }
}
