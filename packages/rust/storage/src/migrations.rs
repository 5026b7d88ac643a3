//! SQL migration definitions for the autoblogger job database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: jobs, artifacts, images, receipts",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Article jobs: the full job record as JSON plus queryable columns
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    state_label TEXT NOT NULL,
    terminal    INTEGER NOT NULL DEFAULT 0,
    job_json    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_terminal ON jobs(terminal);

-- Per-stage artifacts (drafts, SEO metadata) enabling resume-after-restart
CREATE TABLE IF NOT EXISTS artifacts (
    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    stage      TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(job_id, stage)
);

CREATE INDEX IF NOT EXISTS idx_artifacts_job ON artifacts(job_id);

-- Downloaded image assets (bytes kept out of the JSON artifacts)
CREATE TABLE IF NOT EXISTS images (
    job_id      TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    bytes       BLOB NOT NULL,
    mime        TEXT NOT NULL,
    attribution TEXT NOT NULL,
    source_url  TEXT NOT NULL,
    license     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Publish receipts keyed by job id (the publish idempotency record)
CREATE TABLE IF NOT EXISTS receipts (
    job_id            TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    post_id           INTEGER NOT NULL,
    url               TEXT NOT NULL,
    published_at      TEXT NOT NULL,
    idempotency_token TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
