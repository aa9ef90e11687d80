//! SQL migration definitions for the ReviewRelay database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
        description: "Initial schema: users, org_settings, org_channel_overrides, curated_albums",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Tracked users and their polling watermark
CREATE TABLE IF NOT EXISTS users (
    discord_id      TEXT PRIMARY KEY,
    username        TEXT NOT NULL,
    last_review_url TEXT,
    last_checked_at TEXT
);

-- Per-organization default channel
CREATE TABLE IF NOT EXISTS org_settings (
    org_id             TEXT PRIMARY KEY,
    default_channel_id TEXT
);

-- Per-organization, per-source channel overrides
CREATE TABLE IF NOT EXISTS org_channel_overrides (
    org_id     TEXT NOT NULL REFERENCES org_settings(org_id) ON DELETE CASCADE,
    source     TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    PRIMARY KEY (org_id, source)
);

-- Curated "best-of" album lists
CREATE TABLE IF NOT EXISTS curated_albums (
    title  TEXT NOT NULL,
    artist TEXT NOT NULL,
    source TEXT NOT NULL,
    PRIMARY KEY (title, artist, source)
);

CREATE INDEX IF NOT EXISTS idx_curated_source ON curated_albums(source);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
