//! SQL DDL for all cairn tables.
//!
//! Defines the `memories` table, the `memories_vec` (vec0) similarity index,
//! and `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent
//! initialization. The vec0 table's vector width comes from the configured
//! embedding dimensionality, so it is formatted at init time rather than
//! written as a constant.

use rusqlite::Connection;

/// Schema DDL for the core tables.
///
/// `content_hash` carries a UNIQUE index: it is both the exact-duplicate
/// lookup path and the guard that stops two concurrent writers from
/// persisting the same content twice (the insert path handles the conflict
/// as a merge).
const SCHEMA_SQL: &str = r#"
-- Core memory storage
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL CHECK(length(content) > 0),
    content_hash TEXT NOT NULL,
    memory_type TEXT NOT NULL CHECK(memory_type IN ('fact','decision','lesson','pattern','failure')),
    agent_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    parent_id TEXT,
    confidence REAL NOT NULL DEFAULT 1.0 CHECK(confidence >= 0.0 AND confidence <= 1.0),
    access_count INTEGER NOT NULL DEFAULT 0 CHECK(access_count >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_content_hash ON memories(content_hash);
CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_id);
CREATE INDEX IF NOT EXISTS idx_memories_confidence ON memories(confidence);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
///
/// `dimensions` fixes the width of the vec0 embedding column; reopening an
/// existing database with a different width is caught by the fingerprint
/// check in [`crate::db::migrations`], not here.
pub fn init_schema(conn: &Connection, dimensions: usize) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // vec0 virtual table must be created separately (sqlite-vec syntax).
    let vec_sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_vec USING vec0(\n\
         id TEXT PRIMARY KEY,\n\
         embedding FLOAT[{dimensions}]\n\
         );"
    );
    conn.execute_batch(&vec_sql)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, 16).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"memories".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));

        // Verify the vec0 extension is live
        let version: String = conn
            .query_row("SELECT vec_version()", [], |r| r.get(0))
            .unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn schema_is_idempotent() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, 16).unwrap();
        init_schema(&conn, 16).unwrap(); // second call should not error
    }

    #[test]
    fn content_hash_is_unique() {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn, 16).unwrap();

        conn.execute(
            "INSERT INTO memories (id, content, content_hash, memory_type, created_at, updated_at) \
             VALUES ('a', 'x', 'h1', 'fact', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let err = conn.execute(
            "INSERT INTO memories (id, content, content_hash, memory_type, created_at, updated_at) \
             VALUES ('b', 'x', 'h1', 'fact', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(err.is_err(), "duplicate content_hash must violate the unique index");
    }
}
