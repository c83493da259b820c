#![allow(dead_code)]

use cairn::db;
use cairn::memory::consolidate::{consolidate, Consolidation, NewMemory};
use cairn::memory::types::{Memory, MemoryType};
use rusqlite::Connection;

/// Small embedding width keeps test vectors readable. The engine never
/// assumes a particular width; it comes from the schema.
pub const DIMS: usize = 16;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    db::schema::init_schema(&conn, DIMS).unwrap();
    db::migrations::run_migrations(&conn).unwrap();
    conn
}

/// Unit vector with a spike at position `seed`. Distinct seeds are
/// orthogonal, so cosine similarity between them is 0.
pub fn test_embedding(seed: u8) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed as usize % DIMS] = 1.0;
    v
}

/// Perturb `base` slightly and re-normalize. Cosine similarity to `base`
/// stays above 0.99, comfortably over the 0.95 dedup threshold.
pub fn similar_embedding(base: &[f32]) -> Vec<f32> {
    let mut v = base.to_vec();
    for i in 0..4 {
        v[(i * 3) % DIMS] += 0.05;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Candidate record with test defaults.
pub fn candidate(content: &str, embedding: Vec<f32>) -> NewMemory {
    NewMemory {
        content: content.to_string(),
        embedding,
        memory_type: MemoryType::Fact,
        agent_id: None,
        metadata: serde_json::json!({}),
        parent_id: None,
        confidence: 1.0,
    }
}

/// Consolidate with the default threshold and return the record.
pub fn store(conn: &mut Connection, content: &str, embedding: Vec<f32>) -> Memory {
    match consolidate(conn, candidate(content, embedding), 0.95).unwrap() {
        Consolidation::Inserted(m) | Consolidation::Merged(m) => m,
    }
}

/// Read a column for a memory id straight from the table.
pub fn db_access_count(conn: &Connection, id: &str) -> u32 {
    conn.query_row(
        "SELECT access_count FROM memories WHERE id = ?1",
        rusqlite::params![id],
        |row| row.get(0),
    )
    .unwrap()
}
