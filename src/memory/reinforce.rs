//! Access-driven reinforcement.
//!
//! Every successful direct read and every search hit bumps the record's
//! `access_count` by exactly one, as a single atomic UPDATE (never a
//! fetch-then-write), so concurrent readers can't lose increments.
//! Reinforcement touches nothing else: confidence, content, and embedding
//! are off limits.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::memory::types::{Memory, MEMORY_COLUMNS};

/// Read a memory and atomically bump its access counter in one statement.
///
/// The returned record reflects the post-increment count. `None` when the
/// id does not exist.
pub fn read_and_reinforce(conn: &Connection, memory_id: &str) -> Result<Option<Memory>> {
    let sql = format!(
        "UPDATE memories SET access_count = access_count + 1 \
         WHERE id = ?1 RETURNING {MEMORY_COLUMNS}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![memory_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(Memory::from_row(row)?)),
        None => Ok(None),
    }
}

/// Bump the access counter for every search hit.
///
/// Callers treat this as fire-and-forget relative to the response: the
/// result payload keeps whatever count was read during ranking.
pub fn reinforce_batch(conn: &Connection, memory_ids: &[&str]) -> Result<()> {
    if memory_ids.is_empty() {
        return Ok(());
    }
    let mut stmt =
        conn.prepare("UPDATE memories SET access_count = access_count + 1 WHERE id = ?1")?;
    for id in memory_ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}
