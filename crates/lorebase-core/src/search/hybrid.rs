//! Hybrid Search (Keyword + Semantic + RRF)
//!
//! Reciprocal Rank Fusion combines the keyword (BM25/FTS5) and semantic
//! (vector KNN) result lists:
//!
//! `score(d) = sum of 1/(k + rank(d))` across the lists containing `d`.
//!
//! RRF normalizes across unrelated scoring scales and rewards items that
//! both retrievers agree on; `k` dampens the weight of top ranks.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

/// Default fusion constant.
pub const RRF_K: f64 = 60.0;

/// Tunables for the hybrid search path.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    /// Fusion constant (higher = more uniform weighting)
    pub rrf_k: f64,
    /// Each leg fetches `limit * overfetch` candidates before fusion
    pub overfetch: i64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            rrf_k: RRF_K,
            overfetch: 2,
        }
    }
}

/// Fuse two ranked key lists with Reciprocal Rank Fusion.
///
/// Ranks are the 0-based positions within each input list. The output is
/// sorted by fused score descending, with ties broken by key order so the
/// result is a deterministic function of the inputs.
pub fn reciprocal_rank_fusion<K>(keyword: &[K], semantic: &[K], k: f64) -> Vec<(K, f64)>
where
    K: Eq + Hash + Clone + Ord,
{
    let mut scores: HashMap<K, f64> = HashMap::new();

    for (rank, key) in keyword.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f64);
    }
    for (rank, key) in semantic.iter().enumerate() {
        *scores.entry(key.clone()).or_default() += 1.0 / (k + rank as f64);
    }

    let mut results: Vec<(K, f64)> = scores.into_iter().collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}
