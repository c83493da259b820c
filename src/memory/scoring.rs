//! Relevance scoring: temporal decay, access reinforcement, and the dedup
//! predicate. Pure functions, no I/O.

/// Exponential decay with a hard floor.
///
/// `max((1 - decay_rate)^days_old, min_score)`: memories fade but never
/// drop out of consideration entirely. `days_old` is clamped to ≥ 0 to
/// absorb clock skew between writer and reader.
pub fn decay_factor(days_old: f64, decay_rate: f64, min_score: f64) -> f64 {
    let days_old = days_old.max(0.0);
    (1.0 - decay_rate).powf(days_old).max(min_score)
}

/// Logarithmic access boost: `1 + ln(access_count + 1)`.
///
/// Strictly increasing with diminishing returns; exactly 1 for a record
/// that has never been accessed.
pub fn access_boost(access_count: u32) -> f64 {
    1.0 + (f64::from(access_count) + 1.0).ln()
}

/// Blend raw similarity with recency.
///
/// `temporal_weight` 0 ranks purely by similarity; 1 purely by recency.
pub fn blend(similarity: f64, recency: f64, temporal_weight: f64) -> f64 {
    (1.0 - temporal_weight) * similarity + temporal_weight * recency
}

/// Composite ranking score: `blend × access_boost × decay_factor`, where
/// recency is the decay factor itself.
pub fn final_score(
    similarity: f64,
    days_old: f64,
    access_count: u32,
    decay_rate: f64,
    temporal_weight: f64,
    min_score: f64,
) -> f64 {
    let decay = decay_factor(days_old, decay_rate, min_score);
    blend(similarity, decay, temporal_weight) * access_boost(access_count) * decay
}

/// True when a candidate's similarity clears the dedup threshold.
/// Closed interval: the boundary value itself triggers dedup.
pub fn should_deduplicate(similarity: f64, threshold: f64) -> bool {
    similarity >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_is_one_for_fresh_records() {
        assert!((decay_factor(0.0, 0.01, 0.1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn decay_decreases_with_age() {
        let young = decay_factor(1.0, 0.01, 0.1);
        let old = decay_factor(100.0, 0.01, 0.1);
        assert!(young < 1.0);
        assert!(old < young);
    }

    #[test]
    fn decay_floors_at_min_score() {
        assert!((decay_factor(10_000.0, 0.01, 0.1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn decay_clamps_negative_age() {
        // clock skew: a record "from the future" scores like a fresh one
        assert!((decay_factor(-5.0, 0.01, 0.1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn boost_is_one_when_never_accessed() {
        assert!((access_boost(0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn boost_is_strictly_increasing() {
        let mut prev = access_boost(0);
        for count in 1..50 {
            let next = access_boost(count);
            assert!(next > prev, "boost must grow at count {count}");
            prev = next;
        }
    }

    #[test]
    fn boost_has_diminishing_returns() {
        let first_step = access_boost(1) - access_boost(0);
        let later_step = access_boost(100) - access_boost(99);
        assert!(later_step < first_step);
    }

    #[test]
    fn blend_extremes() {
        assert!((blend(0.8, 0.2, 0.0) - 0.8).abs() < 1e-12);
        assert!((blend(0.8, 0.2, 1.0) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn final_score_non_increasing_in_age() {
        let mut prev = f64::INFINITY;
        for days in [0.0, 1.0, 10.0, 100.0, 1000.0, 10_000.0] {
            let score = final_score(0.9, days, 3, 0.01, 0.3, 0.1);
            assert!(score <= prev, "score must not rise at {days} days");
            prev = score;
        }
    }

    #[test]
    fn final_score_converges_to_floor() {
        // Past the floor, additional age changes nothing
        let a = final_score(0.9, 50_000.0, 3, 0.01, 0.3, 0.1);
        let b = final_score(0.9, 100_000.0, 3, 0.01, 0.3, 0.1);
        assert!((a - b).abs() < 1e-12);
    }

    #[test]
    fn final_score_strictly_increasing_in_access_count() {
        let mut prev = 0.0;
        for count in 0..20 {
            let score = final_score(0.9, 10.0, count, 0.01, 0.3, 0.1);
            assert!(score > prev);
            prev = score;
        }
    }

    #[test]
    fn dedup_boundary_is_closed() {
        assert!(should_deduplicate(0.95, 0.95));
        assert!(!should_deduplicate(0.949_999_99, 0.95));
        assert!(should_deduplicate(0.96, 0.95));
    }
}
