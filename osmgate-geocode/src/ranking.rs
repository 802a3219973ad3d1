//! Candidate ranking and best-match selection.

use osmgate_core::Place;

/// Sort candidates by descending importance. Stable for equal scores.
pub fn rank(candidates: &mut [Place]) {
    candidates.sort_by(|a, b| b.importance.total_cmp(&a.importance));
}

/// Index of the best candidate in an already ranked list.
///
/// The first candidate at or above `min_importance` wins; if none reaches
/// it, the highest-importance candidate is used anyway. `None` only for an
/// empty list.
pub fn select_best(ranked: &[Place], min_importance: f64) -> Option<usize> {
    ranked
        .iter()
        .position(|p| p.importance >= min_importance)
        .or_else(|| {
            ranked
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.importance.total_cmp(&b.importance))
                .map(|(i, _)| i)
        })
}
