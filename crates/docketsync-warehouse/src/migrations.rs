use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_entity_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS dockets_header (
    item_id TEXT PRIMARY KEY,
    sort_key TEXT NOT NULL,
    attributes TEXT NOT NULL,
    run_id TEXT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS documents_header (
    item_id TEXT PRIMARY KEY,
    sort_key TEXT NOT NULL,
    attributes TEXT NOT NULL,
    run_id TEXT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS comments_header (
    item_id TEXT PRIMARY KEY,
    sort_key TEXT NOT NULL,
    attributes TEXT NOT NULL,
    run_id TEXT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS dockets_detail (
    item_id TEXT PRIMARY KEY,
    sort_key TEXT,
    attributes TEXT NOT NULL,
    run_id TEXT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS documents_detail (
    item_id TEXT PRIMARY KEY,
    sort_key TEXT,
    attributes TEXT NOT NULL,
    run_id TEXT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS comments_detail (
    item_id TEXT PRIMARY KEY,
    sort_key TEXT,
    attributes TEXT NOT NULL,
    run_id TEXT,
    ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_sort_key_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_dockets_header_sort_key ON dockets_header(sort_key);
CREATE INDEX IF NOT EXISTS idx_documents_header_sort_key ON documents_header(sort_key);
CREATE INDEX IF NOT EXISTS idx_comments_header_sort_key ON comments_header(sort_key);
"#,
    },
    Migration {
        version: "0003_harvest_runs",
        sql: r#"
CREATE TABLE IF NOT EXISTS harvest_runs (
    run_id TEXT PRIMARY KEY,
    entity TEXT NOT NULL,
    phase TEXT NOT NULL,
    status TEXT NOT NULL,
    items BIGINT NOT NULL DEFAULT 0,
    failures BIGINT NOT NULL DEFAULT 0,
    started_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    finished_at TIMESTAMP
);
"#,
    },
    Migration {
        version: "0004_run_criteria",
        sql: r#"
ALTER TABLE harvest_runs ADD COLUMN IF NOT EXISTS criteria TEXT;
"#,
    },
];

/// Apply every migration not yet recorded in `schema_migrations`.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions known to this build, in application order.
pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|migration| migration.version)
}
