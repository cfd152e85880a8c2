//! SQLite schema definition

/// SQL schema for the archive database
pub const SCHEMA_SQL: &str = r#"
-- Sources: configured origins and their fetch state
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    followee_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    locator TEXT NOT NULL,
    name TEXT,
    cadence_secs INTEGER,
    last_success_at TEXT,
    last_attempt_at TEXT,
    last_error TEXT,
    cursor TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Runs: one row per ingestion pass
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    items_found INTEGER NOT NULL DEFAULT 0,
    items_new INTEGER NOT NULL DEFAULT 0,
    outcomes_json TEXT
);

-- Items: archived content, unique per source fingerprint
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES sources(id),
    run_id TEXT NOT NULL REFERENCES runs(id),
    updated_run_id TEXT REFERENCES runs(id),
    fingerprint TEXT NOT NULL,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    published_at TEXT,
    content TEXT NOT NULL DEFAULT '',
    first_seen_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'raw'
        CHECK (status IN ('raw', 'transcribed', 'summarized', 'sent')),
    transcript TEXT,
    summary TEXT,
    UNIQUE(source_id, fingerprint)
);

-- Enrichment status never moves backward
CREATE TRIGGER IF NOT EXISTS items_status_forward_only
BEFORE UPDATE OF status ON items
WHEN (CASE NEW.status WHEN 'raw' THEN 0 WHEN 'transcribed' THEN 1 WHEN 'summarized' THEN 2 ELSE 3 END)
   < (CASE OLD.status WHEN 'raw' THEN 0 WHEN 'transcribed' THEN 1 WHEN 'summarized' THEN 2 ELSE 3 END)
BEGIN
    SELECT RAISE(ABORT, 'enrichment status cannot move backward');
END;

-- Finalized runs are immutable
CREATE TRIGGER IF NOT EXISTS runs_immutable_once_finalized
BEFORE UPDATE ON runs
WHEN OLD.finished_at IS NOT NULL
BEGIN
    SELECT RAISE(ABORT, 'run is already finalized');
END;

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_items_source_link ON items(source_id, link);
CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
CREATE INDEX IF NOT EXISTS idx_items_run ON items(run_id);
CREATE INDEX IF NOT EXISTS idx_sources_followee ON sources(followee_id);
CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);
"#;
