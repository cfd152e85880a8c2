//! Archive storage using SQLite
//!
//! This module owns every persisted row:
//! - Sources (configured origins and their fetch cursor)
//! - Items (archived content and enrichment state)
//! - Runs (ingestion history with per-source outcomes)
//!
//! Item writes go through [`ArchiveStore::ingest_candidate`], which looks up,
//! classifies and writes inside one transaction while holding the store's
//! write lock, so two tasks can never insert the same fingerprint twice.
//! Handles opened separately on one file are kept apart by SQLite's own
//! writer lock and the unique `(source_id, fingerprint)` index.

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::dedup::{decide, Classification};
use crate::error::{Error, Result};
use crate::models::{
    format_timestamp, now_timestamp, EnrichmentStatus, Item, Run, SourceRecord,
};
use crate::normalize::ItemCandidate;
use crate::registry::{SourceRegistry, SourceSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Archive database handle
#[derive(Clone)]
pub struct ArchiveStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl ArchiveStore {
    /// Connect to the archive database configured in `config`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::connect_path(&config.paths.db_file).await
    }

    async fn connect_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open the archive at a path, creating the schema if needed
    pub async fn open(db_path: &Path) -> Result<Self> {
        let store = Self::connect_path(db_path).await?;
        if !store.is_initialized().await? {
            store.init_schema().await?;
        }
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing archive schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='items'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    // ===== Source Operations =====

    /// Upsert every configured source. Fetch state survives.
    pub async fn sync_sources(&self, registry: &SourceRegistry) -> Result<usize> {
        let sources = registry.list_sources();
        for spec in &sources {
            self.upsert_source(spec).await?;
        }
        debug!(count = sources.len(), "Synced sources");
        Ok(sources.len())
    }

    /// Insert or refresh one source's configuration
    pub async fn upsert_source(&self, spec: &SourceSpec) -> Result<()> {
        let now = now_timestamp();
        sqlx::query(
            r#"
            INSERT INTO sources (id, followee_id, kind, locator, name, cadence_secs, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                followee_id = excluded.followee_id,
                kind = excluded.kind,
                locator = excluded.locator,
                name = excluded.name,
                cadence_secs = excluded.cadence_secs,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&spec.id)
        .bind(&spec.followee_id)
        .bind(spec.kind.to_string())
        .bind(&spec.locator)
        .bind(&spec.name)
        .bind(spec.cadence.map(|c| c.as_secs() as i64))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get source by ID
    pub async fn get_source(&self, id: &str) -> Result<Option<SourceRecord>> {
        let source = sqlx::query_as::<_, SourceRecord>("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    /// List all persisted sources
    pub async fn list_source_records(&self) -> Result<Vec<SourceRecord>> {
        let sources = sqlx::query_as::<_, SourceRecord>("SELECT * FROM sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(sources)
    }

    /// Record a successful fetch. Success time and cursor only move forward,
    /// whatever order overlapping runs finish in.
    pub async fn update_source_cursor(
        &self,
        source_id: &str,
        fetched_at: DateTime<Utc>,
        latest_published: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let fetched = format_timestamp(&fetched_at);
        let cursor = latest_published.as_ref().map(format_timestamp);

        let result = sqlx::query(
            r#"
            UPDATE sources SET
                last_success_at = MAX(COALESCE(last_success_at, ''), ?),
                last_attempt_at = MAX(COALESCE(last_attempt_at, ''), ?),
                cursor = CASE WHEN ? IS NULL THEN cursor ELSE MAX(COALESCE(cursor, ''), ?) END,
                last_error = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&fetched)
        .bind(&fetched)
        .bind(&cursor)
        .bind(&cursor)
        .bind(now_timestamp())
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::SourceNotFound(source_id.to_string()));
        }
        Ok(())
    }

    /// Record a failed fetch attempt without touching success state
    pub async fn record_fetch_failure(
        &self,
        source_id: &str,
        attempted_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sources SET
                last_attempt_at = MAX(COALESCE(last_attempt_at, ''), ?),
                last_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(format_timestamp(&attempted_at))
        .bind(error)
        .bind(now_timestamp())
        .bind(source_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::SourceNotFound(source_id.to_string()));
        }
        Ok(())
    }

    // ===== Item Operations =====

    /// Look up a stored item by fingerprint within a source
    pub async fn find_item_by_fingerprint(
        &self,
        source_id: &str,
        fingerprint: &str,
    ) -> Result<Option<Item>> {
        let mut conn = self.pool.acquire().await?;
        lookup_by_fingerprint(&mut conn, source_id, fingerprint).await
    }

    /// Look up the oldest stored item with a canonical link within a source
    pub async fn find_item_by_link(&self, source_id: &str, link: &str) -> Result<Option<Item>> {
        let mut conn = self.pool.acquire().await?;
        lookup_by_link(&mut conn, source_id, link).await
    }

    /// The item holding a canonical link within a source, when exactly one
    /// does. Several rows under one link mean the link is shared by distinct
    /// entries and says nothing about which of them a candidate corrects.
    pub async fn find_sole_item_by_link(
        &self,
        source_id: &str,
        link: &str,
    ) -> Result<Option<Item>> {
        let mut conn = self.pool.acquire().await?;
        lookup_sole_by_link(&mut conn, source_id, link).await
    }

    /// Get item by ID
    pub async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Classify and store a candidate atomically
    pub async fn ingest_candidate(
        &self,
        candidate: &ItemCandidate,
        run_id: &str,
    ) -> Result<(Classification, Item)> {
        self.ingest(candidate, run_id, LinkMatch::Allowed).await
    }

    /// Like [`ingest_candidate`](Self::ingest_candidate), but identity is the
    /// fingerprint alone. For entries whose link other entries of the same
    /// fetch also carry.
    pub async fn ingest_candidate_by_fingerprint(
        &self,
        candidate: &ItemCandidate,
        run_id: &str,
    ) -> Result<(Classification, Item)> {
        self.ingest(candidate, run_id, LinkMatch::Disabled).await
    }

    async fn ingest(
        &self,
        candidate: &ItemCandidate,
        run_id: &str,
        link_match: LinkMatch,
    ) -> Result<(Classification, Item)> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        claim_writer(&mut tx, &candidate.source_id).await?;

        let by_fingerprint =
            lookup_by_fingerprint(&mut tx, &candidate.source_id, &candidate.fingerprint).await?;
        let by_link = match (&by_fingerprint, link_match) {
            (None, LinkMatch::Allowed) => {
                lookup_sole_by_link(&mut tx, &candidate.source_id, &candidate.link).await?
            }
            _ => None,
        };

        let classification = decide(
            candidate,
            by_fingerprint.as_ref(),
            by_link.as_ref(),
            Some(run_id),
        );
        let item = apply_classification(&mut tx, candidate, &classification, run_id).await?;
        tx.commit().await?;

        debug!(
            source_id = %candidate.source_id,
            item_id = %item.id,
            %classification,
            "Ingested candidate"
        );
        Ok((classification, item))
    }

    /// Apply an already-decided classification
    pub async fn upsert_item(
        &self,
        candidate: &ItemCandidate,
        classification: &Classification,
        run_id: &str,
    ) -> Result<Item> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        claim_writer(&mut tx, &candidate.source_id).await?;
        let item = apply_classification(&mut tx, candidate, classification, run_id).await?;
        tx.commit().await?;
        Ok(item)
    }

    /// Items whose enrichment status is strictly below `status_below`,
    /// oldest first
    pub async fn get_unprocessed_items(
        &self,
        status_below: EnrichmentStatus,
        limit: Option<usize>,
    ) -> Result<Vec<Item>> {
        let statuses = status_below.predecessors();
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = statuses.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let query = format!(
            "SELECT * FROM items WHERE status IN ({}) ORDER BY first_seen_at, id LIMIT ?",
            placeholders
        );

        let mut query_builder = sqlx::query_as::<_, Item>(&query);
        for status in &statuses {
            query_builder = query_builder.bind(status.to_string());
        }
        let items = query_builder
            .bind(limit.map(|l| l as i64).unwrap_or(-1))
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Items currently at exactly `status`
    pub async fn list_items_with_status(&self, status: EnrichmentStatus) -> Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT * FROM items WHERE status = ? ORDER BY first_seen_at, id",
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Items at `status` published (or first seen, when undated) at or after
    /// `since`, newest first
    pub async fn list_items_since(
        &self,
        status: EnrichmentStatus,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT * FROM items
            WHERE status = ? AND COALESCE(published_at, first_seen_at) >= ?
            ORDER BY COALESCE(published_at, first_seen_at) DESC, id
            LIMIT ?
            "#,
        )
        .bind(status.to_string())
        .bind(format_timestamp(&since))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Items first stored or last updated by a run
    pub async fn list_items_for_run(&self, run_id: &str) -> Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT * FROM items WHERE run_id = ? OR updated_run_id = ? ORDER BY source_id, first_seen_at",
        )
        .bind(run_id)
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Attach a transcript and move the item to `transcribed`
    pub async fn attach_transcript(&self, item_id: &str, transcript: &str) -> Result<Item> {
        self.transition(item_id, EnrichmentStatus::Transcribed, Some(("transcript", transcript)))
            .await
    }

    /// Attach a summary and move the item to `summarized`
    pub async fn attach_summary(&self, item_id: &str, summary: &str) -> Result<Item> {
        self.transition(item_id, EnrichmentStatus::Summarized, Some(("summary", summary)))
            .await
    }

    /// Confirm delivery of an item
    pub async fn mark_sent(&self, item_id: &str) -> Result<Item> {
        self.transition(item_id, EnrichmentStatus::Sent, None).await
    }

    /// Move an item forward without attaching text
    pub async fn advance_status(&self, item_id: &str, to: EnrichmentStatus) -> Result<Item> {
        self.transition(item_id, to, None).await
    }

    /// Guarded forward transition. The UPDATE only matches rows still in a
    /// predecessor status, so a racing writer cannot push status backward.
    async fn transition(
        &self,
        item_id: &str,
        to: EnrichmentStatus,
        text: Option<(&'static str, &str)>,
    ) -> Result<Item> {
        let allowed = to.predecessors();
        if !allowed.is_empty() {
            let placeholders = allowed.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let set_text = match text {
                Some((column, _)) => format!(", {} = ?", column),
                None => String::new(),
            };
            let query = format!(
                "UPDATE items SET status = ?, updated_at = ?{} WHERE id = ? AND status IN ({})",
                set_text, placeholders
            );

            let mut query_builder = sqlx::query(&query)
                .bind(to.to_string())
                .bind(now_timestamp());
            if let Some((_, value)) = text {
                query_builder = query_builder.bind(value);
            }
            query_builder = query_builder.bind(item_id);
            for status in &allowed {
                query_builder = query_builder.bind(status.to_string());
            }

            let result = query_builder.execute(&self.pool).await?;
            if result.rows_affected() == 1 {
                return self
                    .get_item(item_id)
                    .await?
                    .ok_or_else(|| Error::ItemNotFound(item_id.to_string()));
            }
        }

        match self.get_item(item_id).await? {
            None => Err(Error::ItemNotFound(item_id.to_string())),
            Some(item) => Err(Error::InvalidTransition {
                item_id: item_id.to_string(),
                from: item.status,
                to: to.to_string(),
            }),
        }
    }

    // ===== Run Operations =====

    /// Start a new run
    pub async fn start_run(&self) -> Result<Run> {
        let run = Run::new();
        sqlx::query(
            r#"
            INSERT INTO runs (id, started_at, status, items_found, items_new)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.started_at)
        .bind(&run.status)
        .bind(run.items_found)
        .bind(run.items_new)
        .execute(&self.pool)
        .await?;
        Ok(run)
    }

    /// Persist a finalized run. A run can be recorded once.
    pub async fn record_run(&self, run: &Run) -> Result<Run> {
        let Some(finished_at) = &run.finished_at else {
            return Err(Error::Other(format!("Run {} has not been finalized", run.id)));
        };

        let result = sqlx::query(
            r#"
            UPDATE runs SET
                finished_at = ?,
                status = ?,
                items_found = ?,
                items_new = ?,
                outcomes_json = ?
            WHERE id = ? AND finished_at IS NULL
            "#,
        )
        .bind(finished_at)
        .bind(&run.status)
        .bind(run.items_found)
        .bind(run.items_new)
        .bind(&run.outcomes_json)
        .bind(&run.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_run(&run.id).await? {
                None => Err(Error::RunNotFound(run.id.clone())),
                Some(_) => Err(Error::RunFinalized(run.id.clone())),
            };
        }

        self.get_run(&run.id)
            .await?
            .ok_or_else(|| Error::RunNotFound(run.id.clone()))
    }

    /// Get run by ID
    pub async fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let run = sqlx::query_as::<_, Run>("SELECT * FROM runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    /// Most recent runs first
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<Run>> {
        let runs = sqlx::query_as::<_, Run>(
            "SELECT * FROM runs ORDER BY started_at DESC, id LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    // ===== Statistics =====

    /// Get source statistics
    pub async fn get_source_stats(&self, source_id: &str) -> Result<SourceStats> {
        let item_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;

        let latest_published: Option<String> =
            sqlx::query_scalar("SELECT MAX(published_at) FROM items WHERE source_id = ?")
                .bind(source_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(SourceStats {
            item_count: item_count as usize,
            latest_published,
        })
    }

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let source_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sources")
            .fetch_one(&self.pool)
            .await?;

        let run_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM runs")
            .fetch_one(&self.pool)
            .await?;

        let by_status: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM items GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let items_by_status: BTreeMap<String, usize> = by_status
            .into_iter()
            .map(|(status, count)| (status, count as usize))
            .collect();

        Ok(GlobalStats {
            source_count: source_count as usize,
            item_count: items_by_status.values().sum(),
            run_count: run_count as usize,
            items_by_status,
        })
    }
}

/// Open the transaction with a write so SQLite grants the writer lock before
/// any lookup. A transaction that reads first can be left on a stale snapshot
/// when another connection commits, and then fails to write.
async fn claim_writer(conn: &mut SqliteConnection, source_id: &str) -> Result<()> {
    sqlx::query("UPDATE sources SET updated_at = updated_at WHERE id = ?")
        .bind(source_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn lookup_by_fingerprint(
    conn: &mut SqliteConnection,
    source_id: &str,
    fingerprint: &str,
) -> Result<Option<Item>> {
    let item = sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE source_id = ? AND fingerprint = ?",
    )
    .bind(source_id)
    .bind(fingerprint)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(item)
}

async fn lookup_by_link(
    conn: &mut SqliteConnection,
    source_id: &str,
    link: &str,
) -> Result<Option<Item>> {
    let item = sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE source_id = ? AND link = ? ORDER BY first_seen_at, id LIMIT 1",
    )
    .bind(source_id)
    .bind(link)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(item)
}

async fn lookup_sole_by_link(
    conn: &mut SqliteConnection,
    source_id: &str,
    link: &str,
) -> Result<Option<Item>> {
    let mut items = sqlx::query_as::<_, Item>(
        "SELECT * FROM items WHERE source_id = ? AND link = ? ORDER BY first_seen_at, id LIMIT 2",
    )
    .bind(source_id)
    .bind(link)
    .fetch_all(&mut *conn)
    .await?;

    if items.len() == 1 {
        Ok(items.pop())
    } else {
        Ok(None)
    }
}

async fn fetch_item(conn: &mut SqliteConnection, item_id: &str) -> Result<Item> {
    sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
        .bind(item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::ItemNotFound(item_id.to_string()))
}

/// Write a classified candidate. Updates touch only content fields and the
/// fingerprint; first-seen time and enrichment state are left alone.
async fn apply_classification(
    conn: &mut SqliteConnection,
    candidate: &ItemCandidate,
    classification: &Classification,
    run_id: &str,
) -> Result<Item> {
    let now = now_timestamp();
    let published = candidate.published_at.as_ref().map(format_timestamp);

    match classification {
        Classification::New => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO items (id, source_id, run_id, fingerprint, title, link, published_at, content, first_seen_at, updated_at, status)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&candidate.source_id)
            .bind(run_id)
            .bind(&candidate.fingerprint)
            .bind(&candidate.title)
            .bind(&candidate.link)
            .bind(&published)
            .bind(&candidate.body)
            .bind(&now)
            .bind(&now)
            .bind(EnrichmentStatus::Raw.to_string())
            .execute(&mut *conn)
            .await?;
            fetch_item(conn, &id).await
        }
        Classification::Update { item_id } => {
            let result = sqlx::query(
                r#"
                UPDATE items SET
                    fingerprint = ?,
                    title = ?,
                    link = ?,
                    published_at = COALESCE(?, published_at),
                    content = ?,
                    updated_at = ?,
                    updated_run_id = ?
                WHERE id = ? AND source_id = ?
                "#,
            )
            .bind(&candidate.fingerprint)
            .bind(&candidate.title)
            .bind(&candidate.link)
            .bind(&published)
            .bind(&candidate.body)
            .bind(&now)
            .bind(run_id)
            .bind(item_id)
            .bind(&candidate.source_id)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(Error::ItemNotFound(item_id.clone()));
            }
            fetch_item(conn, item_id).await
        }
        Classification::Duplicate { item_id } => fetch_item(conn, item_id).await,
    }
}

#[derive(Debug, Clone, Copy)]
enum LinkMatch {
    Allowed,
    Disabled,
}

/// Statistics for a single source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStats {
    pub item_count: usize,
    pub latest_published: Option<String>,
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub source_count: usize,
    pub item_count: usize,
    pub run_count: usize,
    pub items_by_status: BTreeMap<String, usize>,
}
