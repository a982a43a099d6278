use std::cmp::Ordering;

use crate::model::{RankedEntry, ScoredCandidate};

/// NaN sorts last; `-0.0` is folded into `0.0` so it ties with it.
fn sort_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score + 0.0
    }
}

fn compare(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    sort_key(b.score)
        .total_cmp(&sort_key(a.score))
        .then_with(|| a.product_id.cmp(&b.product_id))
}

/// Candidates sorted by score descending, ties by product id ascending.
/// NaN scores sort last. The sort is stable, so exact duplicates keep input
/// order.
pub fn order(candidates: &[ScoredCandidate]) -> Vec<ScoredCandidate> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(compare);
    sorted
}

pub fn rank(query_id: &str, candidates: &[ScoredCandidate]) -> Vec<RankedEntry> {
    order(candidates)
        .into_iter()
        .enumerate()
        .map(|(i, c)| RankedEntry {
            query_id: query_id.to_string(),
            rank: i as u32 + 1,
            product_id: c.product_id,
        })
        .collect()
}

/// Ranks the full candidate set, then keeps the first `k` entries.
pub fn rank_top_k(query_id: &str, candidates: &[ScoredCandidate], k: usize) -> Vec<RankedEntry> {
    let mut ranked = rank(query_id, candidates);
    debug_assert!(ranks_are_sequential(&ranked));
    ranked.truncate(k);
    ranked
}

/// True when the ranks, in any order, are exactly `1..=len`.
pub fn ranks_are_sequential(entries: &[RankedEntry]) -> bool {
    let mut ranks: Vec<u32> = entries.iter().map(|e| e.rank).collect();
    ranks.sort_unstable();
    ranks
        .iter()
        .enumerate()
        .all(|(i, r)| *r as usize == i + 1)
}
