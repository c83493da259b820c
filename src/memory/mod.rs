pub mod bulk;
pub mod consolidate;
pub mod reinforce;
pub mod scoring;
pub mod search;
pub mod types;

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Cosine similarity equivalent of an L2 distance between unit vectors.
///
/// Holds only for L2-normalized embeddings: `d² = 2(1 − cos)`, so
/// `cos = 1 − d²/2`. The embedding client normalizes every vector it
/// returns, which keeps this exact.
pub fn l2_distance_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

/// L2 distance below which unit vectors have cosine similarity ≥ `threshold`.
pub fn cosine_threshold_to_l2(threshold: f64) -> f64 {
    (2.0 * (1.0 - threshold)).max(0.0).sqrt()
}
