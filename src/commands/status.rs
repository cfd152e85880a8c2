//! Status command implementation

use crate::archive::{ArchiveStore, GlobalStats};
use crate::config::Config;
use crate::error::Result;
use crate::models::Run;
use crate::registry::SourceRegistry;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub followee_count: usize,
    pub configured_sources: usize,
    pub summarizer_model: String,
    pub summarizer_key_present: bool,
    pub db_stats: GlobalStats,
    pub last_run: Option<Run>,
}

/// Get system status
pub async fn cmd_status(
    config: &Config,
    store: &ArchiveStore,
    registry: &SourceRegistry,
) -> Result<StatusInfo> {
    info!("Getting status");

    let db_stats = store.get_global_stats().await?;
    let last_run = store.list_runs(1).await?.into_iter().next();

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        followee_count: registry.followees().count(),
        configured_sources: registry.list_sources().len(),
        summarizer_model: config.summarizer.model.clone(),
        summarizer_key_present: config.summarizer_api_key().is_some(),
        db_stats,
        last_run,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 horizons Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Archive: {}", status.db_path);
    println!(
        "\nFollowees: {} ({} configured sources)",
        status.followee_count, status.configured_sources
    );

    let key_status = if status.summarizer_key_present {
        "✓ API key set"
    } else {
        "✗ API key missing"
    };
    println!("Summarizer: {} ({})", status.summarizer_model, key_status);

    println!("\nArchive Stats:");
    println!("  Sources: {}", status.db_stats.source_count);
    println!("  Items: {}", status.db_stats.item_count);
    for (state, count) in &status.db_stats.items_by_status {
        println!("    {}: {}", state, count);
    }
    println!("  Runs: {}", status.db_stats.run_count);

    match &status.last_run {
        Some(run) => println!(
            "\nLast run: {} ({}, started {})",
            run.id, run.status, run.started_at
        ),
        None => println!("\nNo runs yet. Use 'horizons run' to start one."),
    }
}
