use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn apply(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS cache_snapshot (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            items TEXT NOT NULL,
            fetched_at INTEGER NOT NULL,
            last_updated TEXT
        );

        CREATE TABLE IF NOT EXISTS pending_changes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            change_id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL CHECK (kind IN ('add', 'update', 'delete')),
            target_id INTEGER,
            payload TEXT,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS rejected_changes (
            seq INTEGER PRIMARY KEY,
            change_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            target_id INTEGER,
            payload TEXT,
            created_at INTEGER NOT NULL,
            retry_count INTEGER NOT NULL,
            reason TEXT NOT NULL,
            rejected_at INTEGER NOT NULL
        );
        "#,
    )
    .context("applying schema migrations")?;
    Ok(())
}
