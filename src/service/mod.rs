//! Ranking collaborators: anything that can order or score catalog products
//! for a query. HTTP clients talk to the real services; the in-memory
//! implementations stand in for them offline and in tests.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::model::ScoredCandidate;
use crate::ranking;

pub mod http;
pub mod memory;

pub use http::{BackendClient, RerankClient};
pub use memory::{EncoderRanker, EncoderReranker, StaticRanker};

/// Returns catalog product ids for a query, best first.
pub trait CandidateRanker {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>>;
}

impl<R: CandidateRanker + ?Sized> CandidateRanker for &R {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        (**self).rank_candidates(query)
    }
}

impl CandidateRanker for Box<dyn CandidateRanker + Send + Sync> {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        (**self).rank_candidates(query)
    }
}

/// Wire shape of a rerank candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankCandidate {
    pub product: String,
    pub text: String,
}

/// Scores `(id, text)` candidates against a query, e.g. a cross-encoder.
pub trait Reranker {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<ScoredCandidate>>;
}

impl<X: Reranker + ?Sized> Reranker for &X {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<ScoredCandidate>> {
        (**self).rerank(query, candidates)
    }
}

impl Reranker for Box<dyn Reranker + Send + Sync> {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<ScoredCandidate>> {
        (**self).rerank(query, candidates)
    }
}

/// Retrieves with `retriever`, reorders the first `depth` ids with
/// `reranker` and keeps `limit`. Only retrieved ids survive the rerank. A
/// failing reranker leaves the retrieval order in place.
pub struct RerankedRanker<R, X> {
    retriever: R,
    reranker: X,
    texts: HashMap<String, String>,
    depth: usize,
    limit: usize,
}

impl<R, X> RerankedRanker<R, X> {
    pub fn new(retriever: R, reranker: X, texts: HashMap<String, String>) -> Self {
        Self {
            retriever,
            reranker,
            texts,
            depth: 64,
            limit: usize::MAX,
        }
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth.max(1);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl<R: CandidateRanker, X: Reranker> CandidateRanker for RerankedRanker<R, X> {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        let mut ids = self.retriever.rank_candidates(query)?;
        ids.truncate(self.depth);

        let candidates: Vec<RerankCandidate> = ids
            .iter()
            .map(|id| RerankCandidate {
                product: id.clone(),
                text: self.texts.get(id).cloned().unwrap_or_default(),
            })
            .collect();

        let mut ordered = match self.reranker.rerank(query, &candidates) {
            Ok(scored) => {
                let retrieved: HashSet<&str> = ids.iter().map(String::as_str).collect();
                let kept: Vec<ScoredCandidate> = scored
                    .into_iter()
                    .filter(|c| retrieved.contains(c.product_id.as_str()))
                    .collect();
                ranking::order(&kept)
                    .into_iter()
                    .map(|c| c.product_id)
                    .collect()
            }
            Err(err) => {
                warn!(%err, query, "rerank failed, keeping retrieval order");
                ids
            }
        };
        ordered.truncate(self.limit);
        Ok(ordered)
    }
}
