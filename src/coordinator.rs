//! Run coordinator: one ingestion pass across every due source
//!
//! Per source the pass moves through fetching, normalizing and classifying,
//! ending as stored, soft-failed or hard-failed. Fetches run concurrently
//! and are the only work that races the shutdown signal. Once a fetch result
//! is in hand its entries are written one at a time, in upstream order.

use crate::archive::ArchiveStore;
use crate::config::{Config, FetchConfig};
use crate::dedup::Classification;
use crate::error::{Error, Result};
use crate::fetch::{FetchOutput, Fetchers};
use crate::models::{Run, RunStatus, SourceOutcome, SourceState};
use crate::normalize::Normalizer;
use crate::progress::{advance_progress, finish_progress, start_progress};
use crate::registry::{SourceRegistry, SourceSpec};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Treat every selected source as due
    pub force: bool,
    /// Only consider these source IDs
    pub source_ids: Option<Vec<String>>,
    /// Draw a progress bar while fetching
    pub show_progress: bool,
}

/// Finalized run plus what was left out of it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: Run,
    pub outcomes: Vec<SourceOutcome>,
    /// Sources selected but not yet due
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn status(&self) -> Result<RunStatus> {
        self.run.get_status()
    }
}

pub struct RunCoordinator {
    store: ArchiveStore,
    registry: SourceRegistry,
    fetchers: Fetchers,
    normalizer: Normalizer,
    fetch: FetchConfig,
}

impl RunCoordinator {
    pub fn new(config: &Config, store: ArchiveStore, registry: SourceRegistry) -> Result<Self> {
        Ok(Self {
            store,
            registry,
            fetchers: Fetchers::new(&config.fetch)?,
            normalizer: Normalizer::new(config.fetch.max_body_chars),
            fetch: config.fetch.clone(),
        })
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// One pass with no cancellation
    pub async fn run_once(&self, options: &RunOptions) -> Result<RunReport> {
        self.run_until(options, std::future::pending()).await
    }

    /// One pass over due sources. When `shutdown` resolves, in-flight fetches
    /// are abandoned and the run is finalized with what completed.
    pub async fn run_until<F>(&self, options: &RunOptions, shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        self.store.sync_sources(&self.registry).await?;
        let (due, skipped) = self.select_due(options).await?;

        if !skipped.is_empty() {
            info!(count = skipped.len(), "Skipping sources that are not due");
        }

        let (run, outcomes) = self.execute(&due, options.show_progress, shutdown).await?;
        Ok(RunReport {
            run,
            outcomes,
            skipped,
        })
    }

    /// One pass over explicit sources, registering them first. Used for
    /// ad-hoc ingestion outside the configured registry.
    pub async fn run_sources<F>(&self, specs: &[SourceSpec], shutdown: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        for spec in specs {
            self.store.upsert_source(spec).await?;
        }

        let (run, outcomes) = self.execute(specs, false, shutdown).await?;
        Ok(RunReport {
            run,
            outcomes,
            skipped: Vec::new(),
        })
    }

    async fn select_due(&self, options: &RunOptions) -> Result<(Vec<SourceSpec>, Vec<String>)> {
        let selected: Vec<&SourceSpec> = match &options.source_ids {
            Some(ids) => {
                let mut selected = Vec::new();
                for id in ids {
                    let spec = self
                        .registry
                        .get_source(id)
                        .ok_or_else(|| Error::SourceNotFound(id.clone()))?;
                    selected.push(spec);
                }
                selected.sort_by(|a, b| a.id.cmp(&b.id));
                selected.dedup_by(|a, b| a.id == b.id);
                selected
            }
            None => self.registry.list_sources(),
        };

        let now = Utc::now();
        let mut due = Vec::new();
        let mut skipped = Vec::new();

        for spec in selected {
            let last_success = self
                .store
                .get_source(&spec.id)
                .await?
                .and_then(|record| record.last_success());

            if options.force || spec.is_due(last_success, now) {
                due.push(spec.clone());
            } else {
                debug!(source_id = %spec.id, "Source not due");
                skipped.push(spec.id.clone());
            }
        }

        Ok((due, skipped))
    }

    async fn execute<F>(
        &self,
        specs: &[SourceSpec],
        show_progress: bool,
        shutdown: F,
    ) -> Result<(Run, Vec<SourceOutcome>)>
    where
        F: Future<Output = ()>,
    {
        let mut run = self.store.start_run().await?;
        info!(run_id = %run.id, sources = specs.len(), "Starting run");

        let fetched = self.fetch_all(&run.id, specs, show_progress, shutdown).await;

        let mut outcomes = Vec::with_capacity(specs.len());
        for (spec, result) in specs.iter().zip(fetched) {
            let span = info_span!("source", run_id = %run.id, source_id = %spec.id);
            let outcome = match result {
                Some(Ok(output)) => self.ingest_source(&run.id, spec, output).instrument(span).await,
                Some(Err(e)) => self.fail_source(spec, e).instrument(span).await,
                None => {
                    let _enter = span.enter();
                    warn!("Fetch abandoned");
                    SourceOutcome::hard_failed(&spec.id, "run cancelled")
                }
            };
            outcomes.push(outcome);
        }

        outcomes.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        run.finalize(&outcomes)?;
        let run = self.store.record_run(&run).await?;

        match run.get_status()? {
            RunStatus::Failed => error!(
                run_id = %run.id,
                sources = outcomes.len(),
                "Run failed: no source was reachable"
            ),
            RunStatus::Partial => warn!(
                run_id = %run.id,
                items_found = run.items_found,
                items_new = run.items_new,
                "Run finished with failed sources"
            ),
            _ => info!(
                run_id = %run.id,
                items_found = run.items_found,
                items_new = run.items_new,
                "Run finished"
            ),
        }

        Ok((run, outcomes))
    }

    /// Fetch every source concurrently. Slots stay `None` for fetches that
    /// were still in flight when `shutdown` resolved.
    async fn fetch_all<F>(
        &self,
        run_id: &str,
        specs: &[SourceSpec],
        show_progress: bool,
        shutdown: F,
    ) -> Vec<Option<Result<FetchOutput>>>
    where
        F: Future<Output = ()>,
    {
        let mut results: Vec<Option<Result<FetchOutput>>> = specs.iter().map(|_| None).collect();
        let progress = if show_progress {
            start_progress(specs.len(), "Fetching sources")
        } else {
            None
        };

        let mut pending = stream::iter(specs.iter().enumerate())
            .map(|(idx, spec)| {
                let span = info_span!("source", run_id = %run_id, source_id = %spec.id);
                async move { (idx, self.fetch_with_retry(spec).await) }.instrument(span)
            })
            .buffer_unordered(self.fetch.concurrency.max(1));

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((idx, result)) => {
                        advance_progress(&progress, Some(&specs[idx].id));
                        results[idx] = Some(result);
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    warn!(run_id, "Run cancelled, abandoning in-flight fetches");
                    break;
                }
            }
        }

        finish_progress(progress, "Sources fetched");
        results
    }

    async fn fetch_with_retry(&self, spec: &SourceSpec) -> Result<FetchOutput> {
        let limit = Duration::from_secs(self.fetch.timeout_secs);
        let backoff = Duration::from_millis(self.fetch.retry_backoff_ms);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, kind = %spec.kind, "Fetching");

            let result = match tokio::time::timeout(limit, self.fetchers.fetch(spec)).await {
                Ok(result) => result,
                Err(_) => Err(Error::fetch(
                    &spec.id,
                    format!("timed out after {}s", self.fetch.timeout_secs),
                )),
            };

            match result {
                Ok(output) => return Ok(output),
                Err(e) if attempt <= self.fetch.retries => {
                    warn!(attempt, "Fetch failed, retrying: {}", e);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Normalize and store one source's entries in fetch order
    async fn ingest_source(
        &self,
        run_id: &str,
        spec: &SourceSpec,
        output: FetchOutput,
    ) -> SourceOutcome {
        let mut outcome = SourceOutcome::new(&spec.id);
        outcome.items_found = output.entries.len();
        outcome.soft_failures = output.soft_failures;

        debug!(entries = output.entries.len(), "Normalizing");

        let mut candidates = Vec::with_capacity(output.entries.len());
        for entry in &output.entries {
            match self.normalizer.normalize(spec, entry) {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    warn!(link = %entry.link, "Skipping entry: {}", e);
                    outcome.soft_failures += 1;
                }
            }
        }

        // Entries sharing a link are told apart by fingerprint only
        let mut link_counts: HashMap<&str, usize> = HashMap::new();
        for candidate in &candidates {
            *link_counts.entry(candidate.link.as_str()).or_default() += 1;
        }

        for candidate in &candidates {
            let stored = if link_counts.get(candidate.link.as_str()).copied().unwrap_or(0) > 1 {
                self.store
                    .ingest_candidate_by_fingerprint(candidate, run_id)
                    .await
            } else {
                self.store.ingest_candidate(candidate, run_id).await
            };

            match stored {
                Ok((classification, item)) => {
                    debug!(item_id = %item.id, %classification, "Classified");
                    match classification {
                        Classification::New => outcome.items_new += 1,
                        Classification::Update { .. } => outcome.items_updated += 1,
                        Classification::Duplicate { .. } => outcome.items_duplicate += 1,
                    }
                }
                Err(e) => {
                    // Left for the next run
                    warn!(link = %candidate.link, "Failed to store item: {}", e);
                    outcome.soft_failures += 1;
                }
            }
        }

        if let Err(e) = self
            .store
            .update_source_cursor(&spec.id, output.fetched_at, output.latest_published())
            .await
        {
            warn!("Failed to advance source cursor: {}", e);
        }

        if outcome.soft_failures > 0 {
            outcome.state = SourceState::SoftFailed;
        }

        info!(
            state = %outcome.state,
            found = outcome.items_found,
            new = outcome.items_new,
            updated = outcome.items_updated,
            duplicate = outcome.items_duplicate,
            soft_failures = outcome.soft_failures,
            "Source processed"
        );
        outcome
    }

    async fn fail_source(&self, spec: &SourceSpec, err: Error) -> SourceOutcome {
        warn!("Source failed: {}", err);
        if let Err(e) = self
            .store
            .record_fetch_failure(&spec.id, Utc::now(), &err.to_string())
            .await
        {
            warn!("Failed to record fetch failure: {}", e);
        }
        SourceOutcome::hard_failed(&spec.id, err)
    }
}
