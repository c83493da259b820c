//! Forward-only schema migration framework.
//!
//! Tracks the schema version in `schema_meta` and runs sequential migrations
//! to bring the database up to [`CURRENT_SCHEMA_VERSION`]. Also stores the
//! embedding model fingerprint so a model or dimensionality change is caught
//! at startup instead of silently corrupting similarity results.

use rusqlite::Connection;

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

/// Update the stored schema version.
fn update_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Get the stored embedding fingerprint (`model@dimensions`), if any.
pub fn get_embedding_fingerprint(conn: &Connection) -> rusqlite::Result<Option<String>> {
    match conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_fingerprint'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Set the stored embedding fingerprint.
pub fn set_embedding_fingerprint(conn: &Connection, fingerprint: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_fingerprint', ?1)",
        [fingerprint],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let mut version = get_schema_version(conn)?;
    tracing::debug!(schema_version = version, target = CURRENT_SCHEMA_VERSION, "checking migrations");

    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        tracing::info!(from = version, to = next, "running migration");
        apply_migration(conn, next)?;
        update_schema_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// Dispatch a single migration step. New steps slot in here as the schema
/// evolves past the v1 baseline created by [`crate::db::schema::init_schema`].
fn apply_migration(_conn: &Connection, target: u32) -> rusqlite::Result<()> {
    Err(rusqlite::Error::InvalidParameterName(format!(
        "unknown migration target: {target}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::db::load_sqlite_vec();
        let conn = Connection::open_in_memory().unwrap();
        crate::db::schema::init_schema(&conn, 16).unwrap();
        conn
    }

    #[test]
    fn fresh_db_is_at_current_version() {
        let conn = test_db();
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn run_migrations_is_idempotent() {
        let conn = test_db();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap(); // second call should not error
        assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn set_and_get_embedding_fingerprint() {
        let conn = test_db();
        assert!(get_embedding_fingerprint(&conn).unwrap().is_none());

        set_embedding_fingerprint(&conn, "text-embedding-3-small@1536").unwrap();
        assert_eq!(
            get_embedding_fingerprint(&conn).unwrap(),
            Some("text-embedding-3-small@1536".to_string())
        );
    }
}
