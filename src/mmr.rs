//! Maximal marginal relevance (MMR) re-ranking.
//!
//! Selects results that balance relevance to the query against redundancy
//! with what has already been selected:
//!
//! ```text
//! MMR(d) = λ × sim(query, d) − (1 − λ) × max sim(d, selected)
//! ```
//!
//! λ = 1.0 ranks purely by relevance, λ = 0.0 purely by diversity. Ties are
//! broken by candidate position, so selection is deterministic.

use crate::embedding::cosine_similarity;

/// Indices and similarities of the `n` vectors most similar to `query`,
/// highest first; equal scores keep their original order.
pub fn top_n(query: &[f32], vectors: &[&[f32]], n: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .collect();
    // Stable sort keeps insertion order among equal scores.
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(n);
    scored
}

/// Pick up to `k` of `candidates` by MMR, returning candidate indices in
/// selection order.
pub fn mmr_rerank(query: &[f32], candidates: &[&[f32]], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }
    let lambda = lambda.clamp(0.0, 1.0);

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| cosine_similarity(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (pos, &idx) in remaining.iter().enumerate() {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(candidates[idx], candidates[s]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
            let score = lambda * relevance[idx] - (1.0 - lambda) * redundancy;
            if score > best_score {
                best_score = score;
                best_pos = pos;
            }
        }

        selected.push(remaining.remove(best_pos));
    }

    selected
}
