//! Bulk consolidation loop.
//!
//! Splits a text blob on a delimiter and feeds each trimmed, non-empty
//! chunk through a hash-only variant of the write path: an exact
//! `content_hash` match skips the chunk, anything else inserts. Similarity
//! merging is intentionally absent here; that asymmetry with the
//! single-record path is part of the contract, not an oversight.
//!
//! Each chunk produces an explicit [`ChunkOutcome`]. A failed chunk
//! (provider or store error) is recorded and the loop continues; the HTTP
//! summary derived by [`summarize`] counts it as neither imported nor
//! duplicate.

use std::future::Future;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::memory::embedding_to_bytes;
use crate::memory::types::{content_hash, MemoryType};

/// Per-chunk result of a bulk import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Chunk was new; carries the id of the inserted record.
    Imported(String),
    /// Exact digest match; carries the id of the existing record.
    Duplicate(String),
    /// Embedding or store failure; the chunk was skipped.
    Failed(String),
}

/// Counts derived from a list of outcomes. Failed chunks are visible here
/// but not in the HTTP response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSummary {
    pub imported: usize,
    pub duplicates_skipped: usize,
    pub failed: usize,
}

/// Split a blob into trimmed, non-empty chunks.
pub fn split_chunks(content: &str, delimiter: &str) -> Vec<String> {
    content
        .split(delimiter)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run the whole loop: split, embed each chunk, import with hash-only dedup.
///
/// `embed` is called once per chunk; its failure marks that chunk
/// [`ChunkOutcome::Failed`] and the loop moves on. Chunks are processed
/// sequentially, matching the one-provider-call-in-flight model of the rest
/// of the service.
pub async fn bulk_import<F, Fut>(
    db: Arc<Mutex<Connection>>,
    content: &str,
    delimiter: &str,
    memory_type: MemoryType,
    agent_id: Option<String>,
    embed: F,
) -> Vec<ChunkOutcome>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<Vec<f32>>>,
{
    let chunks = split_chunks(content, delimiter);
    let mut outcomes = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let embedding = match embed(chunk.clone()).await {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(error = %e, "bulk chunk skipped: embedding failed");
                outcomes.push(ChunkOutcome::Failed(e.to_string()));
                continue;
            }
        };

        let db = Arc::clone(&db);
        let agent_id = agent_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            import_chunk(&mut conn, &chunk, &embedding, memory_type, agent_id.as_deref())
        })
        .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "bulk chunk skipped: store failed");
                ChunkOutcome::Failed(e.to_string())
            }
            Err(e) => {
                tracing::warn!(error = %e, "bulk chunk skipped: task failed");
                ChunkOutcome::Failed(e.to_string())
            }
        };
        outcomes.push(outcome);
    }

    outcomes
}

/// Hash-only import of a single chunk: exact digest match skips, anything
/// else inserts with default confidence and empty metadata.
pub fn import_chunk(
    conn: &mut Connection,
    content: &str,
    embedding: &[f32],
    memory_type: MemoryType,
    agent_id: Option<&str>,
) -> Result<ChunkOutcome> {
    let hash = content_hash(content);
    let tx = conn.transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM memories WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing_id) = existing {
        tx.commit()?;
        return Ok(ChunkOutcome::Duplicate(existing_id));
    }

    let id = uuid::Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let changed = tx.execute(
        "INSERT INTO memories \
         (id, content, content_hash, memory_type, agent_id, metadata, \
          confidence, access_count, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, '{}', 1.0, 0, ?6, ?6) \
         ON CONFLICT(content_hash) DO NOTHING",
        params![id, content, hash, memory_type.as_str(), agent_id, now],
    )?;

    if changed == 0 {
        // Concurrent writer landed the same hash after our lookup
        let existing_id: String = tx.query_row(
            "SELECT id FROM memories WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        tx.commit()?;
        return Ok(ChunkOutcome::Duplicate(existing_id));
    }

    tx.execute(
        "INSERT INTO memories_vec (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(embedding)],
    )?;
    tx.commit()?;
    Ok(ChunkOutcome::Imported(id))
}

/// Derive summary counts from a list of outcomes.
pub fn summarize(outcomes: &[ChunkOutcome]) -> BulkSummary {
    let mut summary = BulkSummary {
        imported: 0,
        duplicates_skipped: 0,
        failed: 0,
    };
    for outcome in outcomes {
        match outcome {
            ChunkOutcome::Imported(_) => summary.imported += 1,
            ChunkOutcome::Duplicate(_) => summary.duplicates_skipped += 1,
            ChunkOutcome::Failed(_) => summary.failed += 1,
        }
    }
    summary
}
