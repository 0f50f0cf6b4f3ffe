//! Reciprocal Rank Fusion of dense and lexical candidate lists.
//!
//! Each list contributes `weight / (k + rank)` per chunk, with 1-indexed
//! ranks. Chunks found by both lists accumulate both contributions, which
//! is what pushes agreed-upon results to the top.

use std::collections::HashMap;

use crate::lexical::LexicalHit;
use crate::models::RetrievalResult;
use crate::traits::VectorHit;

/// Weights and the rank-smoothing constant for fusion.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub dense_weight: f64,
    pub lexical_weight: f64,
    /// The `k` in `weight / (k + rank)`. Larger values flatten the
    /// difference between adjacent ranks.
    pub rrf_k: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            dense_weight: 0.7,
            lexical_weight: 0.3,
            rrf_k: 60.0,
        }
    }
}

/// Convert an index distance to a similarity in `(0, 1]`.
pub fn dense_similarity(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

// Chunks are merged by id; a chunk that somehow arrives without one falls
// back to a prefix of its text so it can still be deduplicated.
fn fusion_key(id: &str, text: &str) -> String {
    if id.is_empty() {
        text.chars().take(50).collect()
    } else {
        id.to_string()
    }
}

/// Fuse dense and lexical rankings into a single top-`top_k` list.
///
/// The output is ordered by descending fused score. Ties keep their
/// first-seen order, so a chunk that appeared in the dense list wins a
/// tie against one that only appeared lexically.
pub fn reciprocal_rank_fusion(
    dense: &[VectorHit],
    lexical: &[LexicalHit],
    config: &FusionConfig,
    top_k: usize,
) -> Vec<RetrievalResult> {
    let mut order: Vec<RetrievalResult> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for (i, hit) in dense.iter().enumerate() {
        let rank = i + 1;
        let key = fusion_key(&hit.chunk.id, &hit.chunk.text);
        let slot = *by_key.entry(key).or_insert_with(|| {
            order.push(RetrievalResult::from_chunk(&hit.chunk));
            order.len() - 1
        });
        let result = &mut order[slot];
        result.dense_score = Some(dense_similarity(hit.distance));
        result.dense_rank = Some(rank);
        result.fused_score += config.dense_weight / (config.rrf_k + rank as f64);
    }

    for (i, hit) in lexical.iter().enumerate() {
        let rank = i + 1;
        let key = fusion_key(&hit.chunk.id, &hit.chunk.text);
        let slot = *by_key.entry(key).or_insert_with(|| {
            order.push(RetrievalResult::from_chunk(&hit.chunk));
            order.len() - 1
        });
        let result = &mut order[slot];
        result.lexical_score = Some(hit.score);
        result.lexical_rank = Some(rank);
        result.fused_score += config.lexical_weight / (config.rrf_k + rank as f64);
    }

    // Stable sort over insertion order keeps dense-first tie behavior.
    order.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order.truncate(top_k);
    order
}
