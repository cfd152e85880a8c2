//! Run, ingest-url and runs commands

use crate::archive::ArchiveStore;
use crate::config::Config;
use crate::coordinator::{RunCoordinator, RunOptions, RunReport};
use crate::error::Result;
use crate::models::{Run, SourceOutcome, SourceState};
use crate::registry::SourceRegistry;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::info;

/// One ingestion pass over the configured sources
pub async fn cmd_run<F>(
    config: &Config,
    store: &ArchiveStore,
    registry: &SourceRegistry,
    options: RunOptions,
    shutdown: F,
) -> Result<RunReport>
where
    F: Future<Output = ()>,
{
    let coordinator = RunCoordinator::new(config, store.clone(), registry.clone())?;
    coordinator.run_until(&options, shutdown).await
}

/// Archive a single webpage for a followee, outside the configured sources
pub async fn cmd_ingest_url<F>(
    config: &Config,
    store: &ArchiveStore,
    registry: &SourceRegistry,
    url: &str,
    followee: &str,
    shutdown: F,
) -> Result<RunReport>
where
    F: Future<Output = ()>,
{
    let spec = registry.manual_webpage(followee, url)?;
    info!(source_id = %spec.id, url = %spec.locator, "Ingesting webpage");

    let coordinator = RunCoordinator::new(config, store.clone(), registry.clone())?;
    coordinator
        .run_sources(std::slice::from_ref(&spec), shutdown)
        .await
}

/// Print a finished run to console
pub fn print_run_report(report: &RunReport) {
    let run = &report.run;
    println!("\n🛰️  Run {} ({})\n", run.status, run.id);
    println!("Started:  {}", run.started_at);
    println!(
        "Finished: {}",
        run.finished_at.as_deref().unwrap_or("-")
    );
    println!("Items found: {}, new: {}", run.items_found, run.items_new);

    if !report.outcomes.is_empty() {
        println!();
        print_outcomes(&report.outcomes);
    }

    if !report.skipped.is_empty() {
        println!("\nNot due: {}", report.skipped.join(", "));
    }
}

fn print_outcomes(outcomes: &[SourceOutcome]) {
    for outcome in outcomes {
        let icon = match outcome.state {
            SourceState::Stored => "✓",
            SourceState::SoftFailed => "⚠",
            SourceState::HardFailed => "✗",
        };
        println!(
            "  {} {}: found {}, new {}, updated {}, duplicate {}",
            icon,
            outcome.source_id,
            outcome.items_found,
            outcome.items_new,
            outcome.items_updated,
            outcome.items_duplicate
        );
        if outcome.soft_failures > 0 {
            println!("      skipped entries: {}", outcome.soft_failures);
        }
        if let Some(error) = &outcome.error {
            println!("      error: {}", error);
        }
    }
}

/// A stored run with its decoded outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    #[serde(flatten)]
    pub run: Run,
    pub outcomes: Vec<SourceOutcome>,
}

/// Most recent runs first
pub async fn cmd_list_runs(store: &ArchiveStore, limit: usize) -> Result<Vec<RunInfo>> {
    let runs = store.list_runs(limit).await?;
    Ok(runs
        .into_iter()
        .map(|run| RunInfo {
            outcomes: run.outcomes(),
            run,
        })
        .collect())
}

/// Print run history to console
pub fn print_runs(runs: &[RunInfo]) {
    println!("\n🗂️  Recent Runs\n");

    if runs.is_empty() {
        println!("No runs recorded yet.");
        return;
    }

    for info in runs {
        let run = &info.run;
        println!("• {} [{}]", run.started_at, run.status);
        println!("  ID: {}", run.id);
        println!("  Items found: {}, new: {}", run.items_found, run.items_new);
        print_outcomes(&info.outcomes);
        println!();
    }
}
