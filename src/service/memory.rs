use std::collections::HashMap;

use tracing::{debug, warn};

use crate::encoder::Encoder;
use crate::error::{RelevanceError, Result};
use crate::model::{Embedding, Product, ScoredCandidate};
use crate::ranking;
use crate::scoring::{score_candidates, similarity};
use crate::service::{CandidateRanker, RerankCandidate, Reranker};

/// Fixed answers per query text. Unknown queries fail as if the service
/// were down.
#[derive(Debug, Clone, Default)]
pub struct StaticRanker {
    answers: HashMap<String, Vec<String>>,
}

impl StaticRanker {
    pub fn with<I, S>(mut self, query: &str, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.answers
            .insert(query.to_string(), ids.into_iter().map(Into::into).collect());
        self
    }
}

impl CandidateRanker for StaticRanker {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        self.answers
            .get(query)
            .cloned()
            .ok_or_else(|| RelevanceError::ServiceUnavailable(format!("no answer for {query:?}")))
    }
}

/// Brute-force vector search over an embedded catalog.
pub struct EncoderRanker<E> {
    encoder: E,
    catalog: Vec<(String, Embedding)>,
    limit: usize,
}

impl<E: Encoder> EncoderRanker<E> {
    /// Embeds the catalog in batches. Products whose batch and individual
    /// encoding both fail are left out of the index.
    pub fn build(encoder: E, products: &[Product], batch_size: usize) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut catalog = Vec::with_capacity(products.len());
        let mut skipped = 0usize;

        for chunk in products.chunks(batch_size) {
            let texts: Vec<String> = chunk.iter().map(Product::search_text).collect();
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

            match encoder.embed_many(&refs) {
                Ok(vectors) => {
                    for (p, v) in chunk.iter().zip(vectors) {
                        catalog.push((p.id.clone(), v));
                    }
                }
                Err(err) if err.is_recoverable() => {
                    debug!(%err, "batch encoding failed, retrying one by one");
                    for (p, text) in chunk.iter().zip(&texts) {
                        match encoder.embed_one(text) {
                            Ok(v) => catalog.push((p.id.clone(), v)),
                            Err(err) if err.is_recoverable() => {
                                warn!(product_id = %p.id, %err, "skipping product");
                                skipped += 1;
                            }
                            Err(err) => return Err(err),
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }

        if skipped > 0 {
            warn!(skipped, "products left out of the index");
        }

        Ok(Self {
            encoder,
            catalog,
            limit: usize::MAX,
        })
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// Scored catalog for a query, best first, cut at the limit.
    pub fn search(&self, query: &str) -> Result<Vec<ScoredCandidate>> {
        let q = self.encoder.embed_one(query)?;
        let mut ordered = ranking::order(&score_candidates(&q, &self.catalog));
        ordered.truncate(self.limit);
        Ok(ordered)
    }
}

impl<E: Encoder> CandidateRanker for EncoderRanker<E> {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        Ok(self
            .search(query)?
            .into_iter()
            .map(|c| c.product_id)
            .collect())
    }
}

/// Scores rerank candidates by embedding similarity with the query.
pub struct EncoderReranker<E> {
    encoder: E,
}

impl<E: Encoder> EncoderReranker<E> {
    pub fn new(encoder: E) -> Self {
        Self { encoder }
    }
}

impl<E: Encoder> Reranker for EncoderReranker<E> {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<ScoredCandidate>> {
        let q = self.encoder.embed_one(query)?;
        let texts: Vec<&str> = candidates.iter().map(|c| c.text.as_str()).collect();
        let vectors = self.encoder.embed_many(&texts)?;

        Ok(candidates
            .iter()
            .zip(vectors)
            .map(|(c, v)| ScoredCandidate::new(c.product.clone(), similarity(&q, &v)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::FixtureEncoder;

    fn product(id: &str, title: &str) -> Product {
        Product {
            id: id.into(),
            title: title.into(),
            ..Product::default()
        }
    }

    fn fixture(products: &[Product]) -> FixtureEncoder {
        let mut enc = FixtureEncoder::new("fixture");
        enc.insert("soup", vec![1.0, 0.0]).unwrap();
        let vectors = [vec![0.8, 0.6], vec![0.2, 0.98], vec![1.0, 0.0]];
        for (p, v) in products.iter().zip(vectors) {
            enc.insert(p.search_text(), v).unwrap();
        }
        enc
    }

    #[test]
    fn static_ranker_answers_known_queries() {
        let ranker = StaticRanker::default().with("soup", ["p1", "p2"]);
        assert_eq!(ranker.rank_candidates("soup").unwrap(), vec!["p1", "p2"]);
        assert!(ranker.rank_candidates("cake").unwrap_err().is_recoverable());
    }

    #[test]
    fn encoder_ranker_orders_by_similarity() {
        let products = vec![product("p1", "a"), product("p2", "b"), product("p3", "c")];
        let ranker = EncoderRanker::build(fixture(&products), &products, 2).unwrap();

        assert_eq!(ranker.len(), 3);
        assert_eq!(ranker.rank_candidates("soup").unwrap(), vec!["p3", "p1", "p2"]);
        let limited = ranker.with_limit(1);
        assert_eq!(limited.rank_candidates("soup").unwrap(), vec!["p3"]);
    }

    #[test]
    fn encoder_ranker_skips_unencodable_products() {
        let products = vec![product("p1", "a"), product("p2", "b")];
        let mut enc = FixtureEncoder::new("partial");
        enc.insert("soup", vec![1.0, 0.0]).unwrap();
        enc.insert(products[0].search_text(), vec![1.0, 0.0]).unwrap();

        let ranker = EncoderRanker::build(enc, &products, 8).unwrap();
        assert_eq!(ranker.len(), 1);
        assert_eq!(ranker.rank_candidates("soup").unwrap(), vec!["p1"]);
    }

    #[test]
    fn encoder_reranker_scores_candidates() {
        let enc = FixtureEncoder::new("r")
            .with("soup", vec![1.0, 0.0])
            .unwrap()
            .with("lentil soup", vec![0.9, 0.1])
            .unwrap()
            .with("cake", vec![0.0, 1.0])
            .unwrap();
        let reranker = EncoderReranker::new(enc);
        let scored = reranker
            .rerank(
                "soup",
                &[
                    RerankCandidate {
                        product: "cake".into(),
                        text: "cake".into(),
                    },
                    RerankCandidate {
                        product: "lentil".into(),
                        text: "lentil soup".into(),
                    },
                ],
            )
            .unwrap();
        assert_eq!(scored.len(), 2);
        assert!(scored[1].score > scored[0].score);
    }
}
