//! Write path — consolidation and record lifecycle.
//!
//! [`consolidate`] is the single write entry point. It runs the full
//! check-then-act sequence inside one transaction: exact digest lookup,
//! nearest-neighbor lookup, then merge into the match or insert a fresh
//! record. The `UNIQUE` index on `content_hash` backs the insert: a conflict
//! there means another writer created the same content between our lookup
//! and our insert, and the engine merges into that row instead.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::memory::scoring;
use crate::memory::types::{content_hash, Memory, MemoryType, MEMORY_COLUMNS};
use crate::memory::{cosine_threshold_to_l2, embedding_to_bytes, l2_distance_to_cosine};

/// Neighbors examined per dedup check. Candidates past the threshold
/// distance are never reached because KNN results arrive distance-ordered.
const DEDUP_CANDIDATES: usize = 16;

/// A candidate record submitted for consolidation.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub embedding: Vec<f32>,
    pub memory_type: MemoryType,
    pub agent_id: Option<String>,
    pub metadata: serde_json::Value,
    pub parent_id: Option<String>,
    pub confidence: f64,
}

/// Outcome of a consolidation: the candidate merged into an existing record,
/// or was inserted as a new one. Carries the post-mutation record either way.
#[derive(Debug)]
pub enum Consolidation {
    Merged(Memory),
    Inserted(Memory),
}

impl Consolidation {
    pub fn memory(&self) -> &Memory {
        match self {
            Self::Merged(m) | Self::Inserted(m) => m,
        }
    }

    pub fn was_merged(&self) -> bool {
        matches!(self, Self::Merged(_))
    }
}

/// Decide merge-vs-insert for a candidate record and apply the mutation.
///
/// A match exists if an exact `content_hash` hit is found, or if the best
/// nearest neighbor's cosine similarity clears `dedup_threshold`. Merging
/// bumps `access_count`, takes `max` of confidences, unions metadata with
/// incoming keys winning, and touches `updated_at`; content and embedding
/// stay as they were.
pub fn consolidate(
    conn: &mut Connection,
    new: NewMemory,
    dedup_threshold: f64,
) -> Result<Consolidation> {
    let hash = content_hash(&new.content);
    let tx = conn.transaction()?;

    // 1. Exact digest match
    if let Some(existing_id) = find_by_hash(&tx, &hash)? {
        let merged = merge_into(&tx, &existing_id, &new)?;
        tx.commit()?;
        tracing::debug!(id = %merged.id, reason = "hash", "consolidated into existing memory");
        return Ok(Consolidation::Merged(merged));
    }

    // 2. Near-duplicate by similarity
    if let Some(existing_id) = find_similar(&tx, &new.embedding, dedup_threshold)? {
        let merged = merge_into(&tx, &existing_id, &new)?;
        tx.commit()?;
        tracing::debug!(id = %merged.id, reason = "similarity", "consolidated into existing memory");
        return Ok(Consolidation::Merged(merged));
    }

    // 3. Insert. ON CONFLICT covers the window where a concurrent writer
    //    persisted the same hash after our lookup; zero changed rows routes
    //    back to the merge path.
    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let changed = tx.execute(
        "INSERT INTO memories \
         (id, content, content_hash, memory_type, agent_id, metadata, parent_id, \
          confidence, access_count, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9) \
         ON CONFLICT(content_hash) DO NOTHING",
        params![
            id,
            new.content,
            hash,
            new.memory_type.as_str(),
            new.agent_id,
            new.metadata.to_string(),
            new.parent_id,
            new.confidence,
            now,
        ],
    )?;

    if changed == 0 {
        let existing_id = find_by_hash(&tx, &hash)?
            .context("content_hash conflict but no matching row")?;
        let merged = merge_into(&tx, &existing_id, &new)?;
        tx.commit()?;
        tracing::debug!(id = %merged.id, reason = "conflict", "consolidated into existing memory");
        return Ok(Consolidation::Merged(merged));
    }

    tx.execute(
        "INSERT INTO memories_vec (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(&new.embedding)],
    )?;

    let inserted = fetch_memory(&tx, &id)?.context("inserted memory not readable")?;
    tx.commit()?;
    tracing::debug!(id = %inserted.id, "inserted new memory");
    Ok(Consolidation::Inserted(inserted))
}

/// Exact lookup by normalized content digest. At most one row can match
/// because of the unique index.
fn find_by_hash(conn: &Transaction, hash: &str) -> Result<Option<String>> {
    let id = conn
        .query_row(
            "SELECT id FROM memories WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Nearest-neighbor dedup check.
///
/// Among neighbors clearing the threshold, the highest similarity wins;
/// exact similarity ties go to the earliest `created_at` so the outcome is
/// stable across runs.
fn find_similar(conn: &Transaction, embedding: &[f32], threshold: f64) -> Result<Option<String>> {
    let max_distance = cosine_threshold_to_l2(threshold);

    let mut stmt = conn.prepare(
        "SELECT id, distance FROM memories_vec WHERE embedding MATCH ?1 \
         ORDER BY distance LIMIT ?2",
    )?;
    let candidates: Vec<(String, f64)> = stmt
        .query_map(
            params![embedding_to_bytes(embedding), DEDUP_CANDIDATES as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    // (similarity, created_at, id) of the best qualifying neighbor so far
    let mut best: Option<(f64, String, String)> = None;

    for (candidate_id, distance) in candidates {
        // Distance-ordered: everything after the first miss also misses
        if distance > max_distance {
            break;
        }
        let similarity = l2_distance_to_cosine(distance);
        if !scoring::should_deduplicate(similarity, threshold) {
            continue;
        }

        let created_at: Option<String> = conn
            .query_row(
                "SELECT created_at FROM memories WHERE id = ?1",
                params![candidate_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(created_at) = created_at else {
            continue;
        };

        let better = match &best {
            None => true,
            Some((best_sim, best_created, _)) => {
                similarity > *best_sim
                    || (similarity == *best_sim && created_at < *best_created)
            }
        };
        if better {
            best = Some((similarity, created_at, candidate_id));
        }
    }

    Ok(best.map(|(_, _, id)| id))
}

/// Apply the merge mutation to an existing record and return it.
fn merge_into(conn: &Transaction, memory_id: &str, new: &NewMemory) -> Result<Memory> {
    let existing_metadata: String = conn.query_row(
        "SELECT metadata FROM memories WHERE id = ?1",
        params![memory_id],
        |row| row.get(0),
    )?;
    let existing: serde_json::Value =
        serde_json::from_str(&existing_metadata).unwrap_or_else(|_| serde_json::json!({}));
    let merged_metadata = merge_metadata(existing, &new.metadata);

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE memories SET \
         access_count = access_count + 1, \
         confidence = MAX(confidence, ?2), \
         metadata = ?3, \
         updated_at = ?4 \
         WHERE id = ?1",
        params![memory_id, new.confidence, merged_metadata.to_string(), now],
    )?;

    fetch_memory(conn, memory_id)?.context("merge target vanished mid-transaction")
}

/// Shallow union of two metadata objects; incoming keys overwrite existing
/// ones. A non-object incoming value leaves the existing metadata alone.
fn merge_metadata(existing: serde_json::Value, incoming: &serde_json::Value) -> serde_json::Value {
    let serde_json::Value::Object(update) = incoming else {
        return existing;
    };
    match existing {
        serde_json::Value::Object(mut base) => {
            for (key, value) in update {
                base.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(base)
        }
        // Existing metadata was malformed; take the incoming object
        _ => serde_json::Value::Object(update.clone()),
    }
}

/// Fetch a single record by id. Works inside or outside a transaction.
pub fn fetch_memory(conn: &Connection, memory_id: &str) -> Result<Option<Memory>> {
    let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
    let memory = conn
        .query_row(&sql, params![memory_id], |row| Memory::from_row(row))
        .optional()?;
    Ok(memory)
}

/// Hard delete: removes the record and its embedding. Irreversible, no
/// tombstone. Returns `false` when the id does not exist.
pub fn delete_memory(conn: &mut Connection, memory_id: &str) -> Result<bool> {
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM memories_vec WHERE id = ?1",
        params![memory_id],
    )?;
    let rows = tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;
    tx.commit()?;
    Ok(rows > 0)
}
