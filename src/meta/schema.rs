//! SQLite schema definition

/// SQL schema for the pipeline database
pub const SCHEMA_SQL: &str = r#"
-- Raw rows as delivered by uploads; only `processed` is ever updated
CREATE TABLE IF NOT EXISTS raw_records (
    source_id INTEGER PRIMARY KEY AUTOINCREMENT,
    last_update TEXT,
    brand_label TEXT,
    author_name TEXT,
    channel TEXT,
    message_type TEXT,
    text TEXT,
    tags TEXT,
    post_link TEXT,
    sentiment TEXT,
    caption TEXT,
    upload_batch_id TEXT,
    original_row_index TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Canonical records: one row per logical comment
CREATE TABLE IF NOT EXISTS canonical_records (
    canonical_id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL,
    last_update TEXT NOT NULL,
    brand_label TEXT NOT NULL DEFAULT '',
    author_name TEXT NOT NULL,
    channel TEXT NOT NULL,
    message_type TEXT NOT NULL DEFAULT '',
    text TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '',
    post_link TEXT NOT NULL DEFAULT '',
    sentiment TEXT NOT NULL DEFAULT '',
    caption TEXT NOT NULL DEFAULT '',
    upload_batch_id TEXT NOT NULL DEFAULT '',
    original_row_index INTEGER NOT NULL DEFAULT 0,
    dedupe_date TEXT NOT NULL,
    dedupe_key TEXT NOT NULL UNIQUE,
    source_count INTEGER NOT NULL DEFAULT 1,
    ai_sentiment TEXT,
    ai_confidence REAL,
    ai_processed_at TEXT,
    ai_processing_status TEXT NOT NULL DEFAULT 'pending',
    extreme_negative_processing_status TEXT NOT NULL DEFAULT 'pending',
    extremely_negative INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Enriched records: write-once copies of fully classified canonical rows
CREATE TABLE IF NOT EXISTS enriched_records (
    enriched_id INTEGER PRIMARY KEY AUTOINCREMENT,
    canonical_id INTEGER NOT NULL UNIQUE REFERENCES canonical_records(canonical_id),
    source_id INTEGER NOT NULL,
    last_update TEXT NOT NULL,
    brand_label TEXT NOT NULL,
    author_name TEXT NOT NULL,
    channel TEXT NOT NULL,
    message_type TEXT NOT NULL,
    text TEXT NOT NULL,
    tags TEXT NOT NULL,
    post_link TEXT NOT NULL,
    sentiment TEXT NOT NULL,
    caption TEXT NOT NULL,
    upload_batch_id TEXT NOT NULL,
    original_row_index INTEGER NOT NULL,
    dedupe_date TEXT NOT NULL,
    dedupe_key TEXT NOT NULL,
    source_count INTEGER NOT NULL,
    ai_sentiment TEXT,
    ai_confidence REAL,
    ai_processed_at TEXT,
    ai_processing_status TEXT NOT NULL,
    extreme_negative_processing_status TEXT NOT NULL,
    extremely_negative INTEGER NOT NULL DEFAULT 0,
    ai_analysis_batch_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Pipeline runs: one row per stage invocation
CREATE TABLE IF NOT EXISTS pipeline_runs (
    batch_id TEXT PRIMARY KEY,
    stage TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_ms INTEGER,
    status TEXT NOT NULL,
    source_records INTEGER NOT NULL DEFAULT 0,
    processed_records INTEGER NOT NULL DEFAULT 0,
    success_records INTEGER NOT NULL DEFAULT 0,
    failed_records INTEGER NOT NULL DEFAULT 0,
    duplicate_records INTEGER NOT NULL DEFAULT 0,
    skipped_records INTEGER NOT NULL DEFAULT 0,
    filtered_empty_text_records INTEGER NOT NULL DEFAULT 0,
    filtered_invalid_timestamp_records INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_raw_processed ON raw_records(processed, source_id);
CREATE INDEX IF NOT EXISTS idx_raw_upload ON raw_records(upload_batch_id);
CREATE INDEX IF NOT EXISTS idx_canonical_primary ON canonical_records(ai_processing_status, canonical_id);
CREATE INDEX IF NOT EXISTS idx_canonical_secondary ON canonical_records(extreme_negative_processing_status, canonical_id);
CREATE INDEX IF NOT EXISTS idx_enriched_sentiment ON enriched_records(ai_sentiment);
CREATE INDEX IF NOT EXISTS idx_runs_stage ON pipeline_runs(stage, started_at);
"#;
