//! Database schema migrations for the SQLite record store.

use rusqlite::Connection;
use tracing::info;

use vigil_core::error::Result;

use crate::db::sql_err;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(sql_err("Failed to create migrations table"))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(sql_err("Failed to query migration version"))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: records");
    }

    Ok(())
}

/// Version 1: records table keyed by fingerprint.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id          TEXT PRIMARY KEY NOT NULL,
            state       TEXT NOT NULL
                        CHECK (state IN ('inbox-of-work', 'pending-approval', 'approved',
                                         'rejected', 'done', 'failed')),
            content     TEXT NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_records_state
            ON records (state, updated_at ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'records');
        ",
    )
    .map_err(sql_err("Failed to apply migration v1"))?;
    Ok(())
}
