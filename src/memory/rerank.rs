//! Scoring of retrieval candidates.
//!
//! `final_score = similarity * confidence * recency`, where recency decays
//! linearly from 1.0 to a floor over a fixed window.

use chrono::{DateTime, Utc};

use super::record::{MemoryRecord, RetrievalResult};
use crate::config::MemoryConfig;

/// Convert a cosine distance in [0, 2] to a similarity in [0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// Recency multiplier for `record` at `now`.
pub fn recency_factor(record: &MemoryRecord, now: DateTime<Utc>, config: &MemoryConfig) -> f32 {
    match record.age_hours(now) {
        Some(hours) => {
            let decayed = 1.0 - hours / config.recency_window_hours;
            (decayed as f32).clamp(config.recency_floor, 1.0)
        }
        None => config.invalid_timestamp_recency,
    }
}

/// Score and sort candidates, best first. Ties keep candidate order.
pub fn rerank(
    candidates: Vec<(MemoryRecord, f32)>,
    now: DateTime<Utc>,
    config: &MemoryConfig,
) -> Vec<RetrievalResult> {
    let mut scored: Vec<RetrievalResult> = candidates
        .into_iter()
        .map(|(record, similarity)| {
            let score = similarity * record.confidence_score * recency_factor(&record, now, config);
            RetrievalResult {
                record,
                similarity,
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored
}
