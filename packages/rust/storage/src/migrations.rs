//! SQL migration definitions for the OrgBrief database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: entities, partition_fields, state, triggers, assets",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per organization; key is the lowercased name
CREATE TABLE IF NOT EXISTS entities (
    key        TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Field values per entity and partition (internal, crm, discovered, final)
CREATE TABLE IF NOT EXISTS partition_fields (
    entity_key TEXT NOT NULL REFERENCES entities(key) ON DELETE CASCADE,
    partition  TEXT NOT NULL,
    field_key  TEXT NOT NULL,
    value_json TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entity_key, partition, field_key)
);

CREATE INDEX IF NOT EXISTS idx_partition_fields_entity ON partition_fields(entity_key, partition);

-- Well-known JSON blobs (work queue, field schema)
CREATE TABLE IF NOT EXISTS state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Recurring resume triggers
CREATE TABLE IF NOT EXISTS triggers (
    handler     TEXT PRIMARY KEY,
    period_secs INTEGER NOT NULL,
    created_at  TEXT NOT NULL
);

-- Explicit report assets (logo, flag) per entity
CREATE TABLE IF NOT EXISTS assets (
    entity_key TEXT NOT NULL REFERENCES entities(key) ON DELETE CASCADE,
    kind       TEXT NOT NULL,
    locator    TEXT NOT NULL,
    PRIMARY KEY (entity_key, kind)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Entity cohorts",
            sql: r#"
ALTER TABLE entities ADD COLUMN cohort TEXT;

CREATE INDEX IF NOT EXISTS idx_entities_cohort ON entities(cohort COLLATE NOCASE);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
