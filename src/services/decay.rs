//! Retrieval-strength scoring for agent memories.
//!
//! Memory strength decays exponentially from the last access but is
//! boosted by how often the memory has been retrieved. Retrieval ranking
//! blends that strength with the stored importance score.

use chrono::{DateTime, Utc};

/// Half-life in days for strength decay.
pub const DEFAULT_HALF_LIFE_DAYS: f64 = 30.0;

/// Weight of stored importance vs retrieval strength when ranking.
pub const DEFAULT_IMPORTANCE_WEIGHT: f64 = 0.6;

/// Floor so old memories stay reachable by direct query.
pub const MIN_STRENGTH: f64 = 0.01;

pub const MAX_STRENGTH: f64 = 1.0;

/// Calculate the retrieval strength of a memory.
pub fn calculate_strength(
    created_at: DateTime<Utc>,
    last_accessed_at: Option<DateTime<Utc>>,
    access_count: i64,
    half_life_days: f64,
) -> f64 {
    let now = Utc::now();

    let base_time = match last_accessed_at {
        Some(accessed) if accessed > created_at => accessed,
        _ => created_at,
    };

    let days_elapsed =
        (now.signed_duration_since(base_time).num_seconds() as f64 / 86400.0).max(0.0);

    let decay_factor = 0.5_f64.powf(days_elapsed / half_life_days.max(1.0));

    let access_boost = if access_count > 0 {
        (1.0 + access_count as f64).log2() * 0.1
    } else {
        0.0
    };

    (decay_factor + access_boost).clamp(MIN_STRENGTH, MAX_STRENGTH)
}

/// Blend stored importance with retrieval strength into a ranking score.
pub fn rank_score(importance: f64, strength: f64, importance_weight: f64) -> f64 {
    let weight = importance_weight.clamp(0.0, 1.0);
    weight * importance.clamp(0.0, 1.0) + (1.0 - weight) * strength.clamp(0.0, 1.0)
}
