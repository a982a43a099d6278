//! Relevance predictions for unlabeled queries.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};

use crate::encoder::Encoder;
use crate::error::Result;
use crate::model::{Prediction, Product, Query};
use crate::ranking;
use crate::relevance::RelevanceThresholds;
use crate::service::EncoderRanker;
use crate::service_eval::Skipped;

#[derive(Debug, Clone, Copy)]
pub struct PredictOptions {
    pub products_per_query: usize,
    pub batch_size: usize,
    pub thresholds: RelevanceThresholds,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            products_per_query: 50,
            batch_size: 32,
            thresholds: RelevanceThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PredictionRun {
    pub predictions: Vec<Prediction>,
    pub queries: usize,
    pub skipped: Vec<Skipped>,
}

impl PredictionRun {
    /// Number of predictions per relevance level.
    pub fn distribution(&self) -> BTreeMap<u8, usize> {
        let mut counts = BTreeMap::new();
        for p in &self.predictions {
            *counts.entry(p.relevance).or_insert(0) += 1;
        }
        counts
    }
}

/// Embeds the catalog once, then keeps the best `products_per_query`
/// products of every query, in rank order, with a relevance mapped from
/// their similarity. Queries the encoder cannot handle are skipped.
pub fn generate_predictions<E: Encoder>(
    encoder: E,
    queries: &[Query],
    products: &[Product],
    opts: &PredictOptions,
) -> Result<PredictionRun> {
    info!(products = products.len(), "encoding products");
    let index = EncoderRanker::build(encoder, products, opts.batch_size)?;

    let mut run = PredictionRun {
        queries: queries.len(),
        ..PredictionRun::default()
    };

    for query in queries {
        let scored = match index.search(&query.text) {
            Ok(scored) => scored,
            Err(err) if err.is_recoverable() => {
                warn!(query_id = %query.id, %err, "skipping query");
                run.skipped.push(Skipped {
                    id: query.id.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
            Err(err) => return Err(err),
        };

        let top = ranking::rank_top_k(&query.id, &scored, opts.products_per_query);
        let score_of: BTreeMap<&str, f32> = scored
            .iter()
            .map(|c| (c.product_id.as_str(), c.score))
            .collect();

        run.predictions.extend(top.into_iter().map(|entry| {
            let score = score_of
                .get(entry.product_id.as_str())
                .copied()
                .unwrap_or(f32::NAN);
            Prediction {
                relevance: opts.thresholds.map(score),
                query_id: entry.query_id,
                product_id: entry.product_id,
            }
        }));
    }

    info!(
        predictions = run.predictions.len(),
        queries = run.queries,
        skipped = run.skipped.len(),
        "generated predictions"
    );
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{FixtureEncoder, HashedEncoder};

    fn product(id: &str, title: &str) -> Product {
        Product {
            id: id.into(),
            title: title.into(),
            ..Product::default()
        }
    }

    fn query(id: &str, text: &str) -> Query {
        Query {
            id: id.into(),
            text: text.into(),
        }
    }

    #[test]
    fn maps_similarity_to_relevance_in_rank_order() {
        let products = vec![product("p2", "cake"), product("p1", "lentil soup")];
        let encoder = FixtureEncoder::new("f")
            .with("soup", vec![1.0, 0.0])
            .unwrap()
            .with(products[0].search_text(), vec![0.2, 0.9797959])
            .unwrap()
            .with(products[1].search_text(), vec![0.8, 0.6])
            .unwrap();

        let run = generate_predictions(
            encoder,
            &[query("q1", "soup")],
            &products,
            &PredictOptions::default(),
        )
        .unwrap();

        let got: Vec<(&str, u8)> = run
            .predictions
            .iter()
            .map(|p| (p.product_id.as_str(), p.relevance))
            .collect();
        assert_eq!(got, vec![("p1", 3), ("p2", 0)]);
        assert_eq!(run.distribution()[&3], 1);
    }

    #[test]
    fn keeps_products_per_query() {
        let products: Vec<Product> = (0..20)
            .map(|i| product(&format!("p{i}"), &format!("product number {i}")))
            .collect();
        let opts = PredictOptions {
            products_per_query: 5,
            ..PredictOptions::default()
        };
        let run = generate_predictions(
            HashedEncoder::new(64),
            &[query("q1", "product"), query("q2", "number 7")],
            &products,
            &opts,
        )
        .unwrap();

        assert_eq!(run.predictions.len(), 10);
        assert!(run.skipped.is_empty());
        assert_eq!(run.distribution().values().sum::<usize>(), 10);
    }

    #[test]
    fn unknown_queries_are_skipped() {
        let products = vec![product("p1", "soup")];
        let encoder = FixtureEncoder::new("f")
            .with(products[0].search_text(), vec![1.0, 0.0])
            .unwrap();
        let run = generate_predictions(
            encoder,
            &[query("q1", "no vector for me")],
            &products,
            &PredictOptions::default(),
        )
        .unwrap();

        assert!(run.predictions.is_empty());
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].id, "q1");
    }
}
