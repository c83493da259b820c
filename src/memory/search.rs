//! Read path — KNN over-fetch, pre-filtering, and decay-aware re-ranking.
//!
//! The caller over-fetches `overfetch_factor × limit` raw candidates from
//! the vector index so that decay and access reinforcement get a chance to
//! promote a lower-raw-similarity record into the top `limit`. Filters run
//! before scoring; filtered-out records never consume a scoring slot.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::memory::consolidate::fetch_memory;
use crate::memory::types::{Memory, MemoryType};
use crate::memory::{embedding_to_bytes, l2_distance_to_cosine, reinforce, scoring};

/// Pre-filters applied to the candidate set before scoring.
#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    pub agent_id: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub min_confidence: f64,
}

/// Scoring knobs for one ranked query.
#[derive(Debug, Clone)]
pub struct RankParams {
    /// Blend between similarity (0) and recency (1).
    pub temporal_weight: f64,
    pub decay_rate: f64,
    pub min_score: f64,
    pub limit: usize,
}

/// A single ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub memory: Memory,
    /// Raw cosine similarity from the vector index.
    pub similarity: f64,
    /// Similarity blended with decay and access reinforcement.
    pub final_score: f64,
}

/// Ranked semantic search: over-fetch, pre-filter, score, truncate, reinforce.
///
/// The returned payloads carry `access_count` as it was read; the bump for
/// the hits is applied as a best-effort batch after the results are
/// assembled, and a failure there is logged rather than failing the search.
pub fn search_memories(
    conn: &Connection,
    query_embedding: &[f32],
    filter: &SearchFilter,
    rank_params: &RankParams,
    overfetch_factor: usize,
) -> Result<Vec<SearchResult>> {
    let candidate_limit = rank_params.limit * overfetch_factor;
    let knn = vector_search(conn, query_embedding, candidate_limit)?;

    let mut candidates: Vec<(Memory, f64)> = Vec::with_capacity(knn.len());
    for (id, similarity) in knn {
        let Some(memory) = fetch_memory(conn, &id)? else {
            continue;
        };
        if !filter.matches(&memory) {
            continue;
        }
        candidates.push((memory, similarity));
    }

    let results = rank(candidates, rank_params, Utc::now());

    let hit_ids: Vec<&str> = results.iter().map(|r| r.memory.id.as_str()).collect();
    if let Err(e) = reinforce::reinforce_batch(conn, &hit_ids) {
        tracing::warn!(error = %e, "failed to reinforce search hits");
    }

    Ok(results)
}

/// Re-rank scored candidates and truncate to the requested size.
///
/// Pure over its inputs: `now` is explicit so ordering is reproducible.
/// Exact score ties break by ascending id (UUID v7, so effectively by
/// creation order).
pub fn rank(
    candidates: Vec<(Memory, f64)>,
    params: &RankParams,
    now: DateTime<Utc>,
) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = candidates
        .into_iter()
        .map(|(memory, similarity)| {
            let days_old = days_between(&memory.created_at, now);
            let final_score = scoring::final_score(
                similarity,
                days_old,
                memory.access_count,
                params.decay_rate,
                params.temporal_weight,
                params.min_score,
            );
            SearchResult {
                memory,
                similarity,
                final_score,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    results.truncate(params.limit);
    results
}

/// Age in fractional days of an RFC 3339 timestamp. Unparseable timestamps
/// count as fresh rather than poisoning the whole result set.
fn days_between(created_at: &str, now: DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(created_at) {
        Ok(created) => (now - created.with_timezone(&Utc)).num_seconds() as f64 / 86_400.0,
        Err(e) => {
            tracing::debug!(created_at, error = %e, "unparseable created_at, treating as fresh");
            0.0
        }
    }
}

/// Vector KNN search via sqlite-vec, with distances converted to cosine
/// similarity.
pub fn vector_search(
    conn: &Connection,
    embedding: &[f32],
    limit: usize,
) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM memories_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let results = stmt
        .query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
            let id: String = row.get(0)?;
            let distance: f64 = row.get(1)?;
            Ok((id, l2_distance_to_cosine(distance)))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

impl SearchFilter {
    fn matches(&self, memory: &Memory) -> bool {
        if let Some(ref agent_id) = self.agent_id {
            if memory.agent_id.as_deref() != Some(agent_id.as_str()) {
                return false;
            }
        }
        if let Some(memory_type) = self.memory_type {
            if memory.memory_type != memory_type {
                return false;
            }
        }
        memory.confidence >= self.min_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::content_hash;

    fn test_memory(id: &str, days_old: f64, access_count: u32, now: DateTime<Utc>) -> Memory {
        let created = now - chrono::Duration::seconds((days_old * 86_400.0) as i64);
        Memory {
            id: id.to_string(),
            content: format!("memory {id}"),
            content_hash: content_hash(&format!("memory {id}")),
            memory_type: MemoryType::Fact,
            agent_id: None,
            metadata: serde_json::json!({}),
            parent_id: None,
            confidence: 1.0,
            access_count,
            created_at: created.to_rfc3339(),
            updated_at: created.to_rfc3339(),
        }
    }

    fn default_params(limit: usize) -> RankParams {
        RankParams {
            temporal_weight: 0.3,
            decay_rate: 0.01,
            min_score: 0.1,
            limit,
        }
    }

    #[test]
    fn rank_truncates_to_limit() {
        let now = Utc::now();
        let candidates: Vec<(Memory, f64)> = (0..9)
            .map(|i| (test_memory(&format!("m{i}"), 0.0, 0, now), 0.5))
            .collect();
        let results = rank(candidates, &default_params(3), now);
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn zero_temporal_weight_ranks_by_similarity() {
        let now = Utc::now();
        // Equal age and access: with recency weighted out, only similarity
        // distinguishes them. Decay still multiplies both scores equally.
        let candidates = vec![
            (test_memory("dissimilar", 30.0, 0, now), 0.3),
            (test_memory("similar", 30.0, 0, now), 0.9),
        ];
        let params = RankParams {
            temporal_weight: 0.0,
            ..default_params(2)
        };
        let results = rank(candidates, &params, now);
        assert_eq!(results[0].memory.id, "similar");
        assert_eq!(results[1].memory.id, "dissimilar");
        // ratio of scores equals ratio of similarities when everything else
        // is held fixed
        let ratio = results[0].final_score / results[1].final_score;
        assert!((ratio - 3.0).abs() < 1e-9);
    }

    #[test]
    fn full_temporal_weight_ranks_by_recency() {
        let now = Utc::now();
        let candidates = vec![
            (test_memory("old-similar", 300.0, 0, now), 0.99),
            (test_memory("new-dissimilar", 0.0, 0, now), 0.01),
        ];
        let params = RankParams {
            temporal_weight: 1.0,
            ..default_params(2)
        };
        let results = rank(candidates, &params, now);
        assert_eq!(results[0].memory.id, "new-dissimilar");
    }

    #[test]
    fn access_count_promotes_a_candidate() {
        let now = Utc::now();
        let candidates = vec![
            (test_memory("quiet", 1.0, 0, now), 0.80),
            (test_memory("popular", 1.0, 20, now), 0.78),
        ];
        let results = rank(candidates, &default_params(2), now);
        assert_eq!(results[0].memory.id, "popular");
    }

    #[test]
    fn equal_scores_order_by_id() {
        let now = Utc::now();
        let candidates = vec![
            (test_memory("bbb", 0.0, 0, now), 0.5),
            (test_memory("aaa", 0.0, 0, now), 0.5),
            (test_memory("ccc", 0.0, 0, now), 0.5),
        ];
        let results = rank(candidates.clone(), &default_params(3), now);
        let ids: Vec<&str> = results.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["aaa", "bbb", "ccc"]);

        // Reproducible across runs
        let again = rank(candidates, &default_params(3), now);
        let ids_again: Vec<&str> = again.iter().map(|r| r.memory.id.as_str()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn filter_by_agent_and_type() {
        let now = Utc::now();
        let mut mine = test_memory("mine", 0.0, 0, now);
        mine.agent_id = Some("rosie".into());
        let mut theirs = test_memory("theirs", 0.0, 0, now);
        theirs.agent_id = Some("other".into());
        let mut decision = test_memory("decision", 0.0, 0, now);
        decision.memory_type = MemoryType::Decision;

        let filter = SearchFilter {
            agent_id: Some("rosie".into()),
            memory_type: None,
            min_confidence: 0.0,
        };
        assert!(filter.matches(&mine));
        assert!(!filter.matches(&theirs));

        let filter = SearchFilter {
            agent_id: None,
            memory_type: Some(MemoryType::Decision),
            min_confidence: 0.0,
        };
        assert!(filter.matches(&decision));
        assert!(!filter.matches(&mine));
    }

    #[test]
    fn filter_by_confidence_floor() {
        let now = Utc::now();
        let mut guess = test_memory("guess", 0.0, 0, now);
        guess.confidence = 0.2;
        let filter = SearchFilter {
            min_confidence: 0.5,
            ..Default::default()
        };
        assert!(!filter.matches(&guess));
        guess.confidence = 0.5;
        assert!(filter.matches(&guess));
    }

    #[test]
    fn unparseable_created_at_counts_as_fresh() {
        assert_eq!(days_between("not a timestamp", Utc::now()), 0.0);
    }
}
