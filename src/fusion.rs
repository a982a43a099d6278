//! Weighted reciprocal-rank fusion of several retrievers.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{RelevanceError, Result};
use crate::model::ScoredCandidate;
use crate::ranking;
use crate::service::CandidateRanker;

pub const DEFAULT_RRF_K: f64 = 60.0;

/// `score(id) = Σ weight / (k + rank)` over the lists containing `id`
/// (ranks 1-based), best first with ties by id.
pub fn weighted_rrf(lists: &[(f64, Vec<String>)], k: f64, limit: usize) -> Vec<ScoredCandidate> {
    let mut scores: HashMap<&str, f64> = HashMap::new();
    for (weight, ids) in lists {
        for (i, id) in ids.iter().enumerate() {
            *scores.entry(id.as_str()).or_insert(0.0) += weight / (k + (i + 1) as f64);
        }
    }

    let fused: Vec<ScoredCandidate> = scores
        .into_iter()
        .map(|(id, s)| ScoredCandidate::new(id, s as f32))
        .collect();
    let mut ordered = ranking::order(&fused);
    ordered.truncate(limit);
    ordered
}

type Member = (f64, Box<dyn CandidateRanker + Send + Sync>);

/// Hybrid retriever combining weighted members. A failing member is left
/// out of the fusion; the query fails only when every member fails.
pub struct FusedRanker {
    members: Vec<Member>,
    k: f64,
    limit: usize,
}

impl FusedRanker {
    pub fn new(k: f64, limit: usize) -> Self {
        Self {
            members: Vec::new(),
            k,
            limit,
        }
    }

    pub fn with_member(
        mut self,
        weight: f64,
        ranker: impl CandidateRanker + Send + Sync + 'static,
    ) -> Self {
        self.members.push((weight, Box::new(ranker)));
        self
    }
}

impl CandidateRanker for FusedRanker {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        let mut lists = Vec::with_capacity(self.members.len());
        let mut last_err = None;

        for (weight, ranker) in &self.members {
            match ranker.rank_candidates(query) {
                Ok(ids) => lists.push((*weight, ids)),
                Err(err) => {
                    warn!(%err, query, "fusion member failed");
                    last_err = Some(err);
                }
            }
        }

        if lists.is_empty() {
            return Err(last_err.unwrap_or_else(|| {
                RelevanceError::ServiceUnavailable("fused ranker has no members".into())
            }));
        }

        Ok(weighted_rrf(&lists, self.k, self.limit)
            .into_iter()
            .map(|c| c.product_id)
            .collect())
    }
}
