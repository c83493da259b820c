mod helpers;

use cairn::db;

#[test]
fn open_database_creates_file_and_schema() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("memory.db");

    let conn = db::open_database(&db_path, helpers::DIMS).unwrap();
    assert!(db_path.exists(), "parent directories are created on demand");

    let tables: Vec<String> = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert!(tables.contains(&"memories".to_string()));
    assert!(tables.contains(&"schema_meta".to_string()));
}

#[test]
fn reopening_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("memory.db");

    {
        let conn = db::open_database(&db_path, helpers::DIMS).unwrap();
        conn.execute(
            "INSERT INTO memories (id, content, content_hash, memory_type, created_at, updated_at) \
             VALUES ('m1', 'persisted', 'h1', 'fact', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
    }

    let conn = db::open_database(&db_path, helpers::DIMS).unwrap();
    let content: String = conn
        .query_row("SELECT content FROM memories WHERE id = 'm1'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(content, "persisted");
}

#[test]
fn schema_version_is_current_after_open() {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open_database(dir.path().join("memory.db"), helpers::DIMS).unwrap();
    assert_eq!(
        db::migrations::get_schema_version(&conn).unwrap(),
        db::migrations::CURRENT_SCHEMA_VERSION
    );
}

#[test]
fn duplicate_content_hash_is_rejected_by_the_index() {
    let conn = helpers::test_db();
    conn.execute(
        "INSERT INTO memories (id, content, content_hash, memory_type, created_at, updated_at) \
         VALUES ('a', 'x', 'same-hash', 'fact', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        [],
    )
    .unwrap();

    let result = conn.execute(
        "INSERT INTO memories (id, content, content_hash, memory_type, created_at, updated_at) \
         VALUES ('b', 'y', 'same-hash', 'fact', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
        [],
    );
    assert!(result.is_err());
}
