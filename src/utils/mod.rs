use std::cmp::Ordering;

pub mod metrics;
pub mod validation;

pub fn clamp_rating(value: f64, min_rating: f64, max_rating: f64) -> f64 {
    value.max(min_rating).min(max_rating)
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Indices of the `k` largest scores, best first. Ties keep input order.
pub fn top_k_indices(scores: &[f64], k: usize) -> Vec<usize> {
    let mut indexed_scores: Vec<(usize, f64)> = scores.iter().copied().enumerate().collect();

    indexed_scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    indexed_scores
        .into_iter()
        .take(k)
        .map(|(i, _)| i)
        .collect()
}
