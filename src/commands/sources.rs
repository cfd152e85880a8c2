//! Sources command implementation

use crate::archive::{ArchiveStore, SourceStats};
use crate::error::Result;
use crate::registry::SourceRegistry;
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Source information with fetch state and stats
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceInfo {
    pub id: String,
    pub followee_id: String,
    pub kind: String,
    pub locator: String,
    pub name: Option<String>,
    pub cadence_secs: Option<i64>,
    pub last_success_at: Option<String>,
    pub last_error: Option<String>,
    pub cursor: Option<String>,
    /// False for sources only known from ad-hoc ingestion or removed from config
    pub configured: bool,
    pub stats: SourceStats,
}

/// List every known source, configured or not
pub async fn cmd_list_sources(
    store: &ArchiveStore,
    registry: &SourceRegistry,
) -> Result<Vec<SourceInfo>> {
    info!("Listing sources");

    store.sync_sources(registry).await?;
    let records = store.list_source_records().await?;
    let mut result = Vec::with_capacity(records.len());

    for record in records {
        let stats = store.get_source_stats(&record.id).await?;
        result.push(SourceInfo {
            configured: registry.get_source(&record.id).is_some(),
            id: record.id,
            followee_id: record.followee_id,
            kind: record.kind,
            locator: record.locator,
            name: record.name,
            cadence_secs: record.cadence_secs,
            last_success_at: record.last_success_at,
            last_error: record.last_error,
            cursor: record.cursor,
            stats,
        });
    }

    Ok(result)
}

/// Print sources list to console
pub fn print_sources(sources: &[SourceInfo]) {
    println!("\n📡 Sources\n");

    if sources.is_empty() {
        println!("No sources configured. Add followees to the config file.");
        return;
    }

    for source in sources {
        let marker = if source.configured { "" } else { " (not in config)" };
        println!(
            "• {} [{}]{}",
            source.name.as_deref().unwrap_or(&source.locator),
            source.kind,
            marker
        );
        println!("  ID: {}", source.id);
        println!("  Followee: {}", source.followee_id);
        println!("  URL: {}", source.locator);
        if let Some(cadence) = source.cadence_secs {
            println!("  Cadence: every {}s", cadence);
        }
        println!("  Items: {}", source.stats.item_count);
        println!(
            "  Last success: {}",
            source.last_success_at.as_deref().unwrap_or("never")
        );
        if let Some(error) = &source.last_error {
            println!("  Last error: {}", error);
        }
        println!();
    }
}

/// Print source IDs with descriptions for shell completions
pub fn print_source_completions(sources: &[SourceInfo], shell: Shell) {
    for source in sources {
        let description = format!(
            "{} {} ({})",
            source.followee_id,
            source.kind,
            source.name.as_deref().unwrap_or(&source.locator)
        )
        .replace('\n', " ");

        match shell {
            Shell::Zsh => println!("{}:{}", source.id, description.replace(':', "\\:")),
            Shell::Fish => println!("{}\t{}", source.id, description.replace('\t', " ")),
            _ => println!("{}", source.id),
        }
    }
}
