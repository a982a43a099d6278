use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::{mean, ndcg_at_k, pearson, spearman, stddev};

pub const DEFAULT_NDCG_K: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub avg: f64,
    pub stddev: f64,
    pub count: usize,
}

/// Metrics of one scoring run against ground truth. Undefined metrics are
/// NaN (serialised as `null`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub spearman: f64,
    pub pearson: f64,
    pub separation: f64,
    pub ndcg: f64,
    pub per_level_stats: BTreeMap<u8, LevelStats>,
}

impl EvaluationResult {
    pub fn undefined() -> Self {
        Self {
            spearman: f64::NAN,
            pearson: f64::NAN,
            separation: f64::NAN,
            ndcg: f64::NAN,
            per_level_stats: BTreeMap::new(),
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.spearman.is_nan()
            && self.pearson.is_nan()
            && self.separation.is_nan()
            && self.ndcg.is_nan()
            && self.per_level_stats.is_empty()
    }

    /// Bitwise comparison that treats NaN as equal to NaN.
    pub fn same_as(&self, other: &Self) -> bool {
        fn eq(a: f64, b: f64) -> bool {
            a.to_bits() == b.to_bits()
        }
        eq(self.spearman, other.spearman)
            && eq(self.pearson, other.pearson)
            && eq(self.separation, other.separation)
            && eq(self.ndcg, other.ndcg)
            && self.per_level_stats.len() == other.per_level_stats.len()
            && self
                .per_level_stats
                .iter()
                .zip(&other.per_level_stats)
                .all(|((la, a), (lb, b))| {
                    la == lb && eq(a.avg, b.avg) && eq(a.stddev, b.stddev) && a.count == b.count
                })
    }
}

pub fn level_stats(true_relevances: &[u8], scores: &[f64]) -> BTreeMap<u8, LevelStats> {
    let mut groups: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
    for (rel, score) in true_relevances.iter().zip(scores) {
        groups.entry(*rel).or_default().push(*score);
    }

    groups
        .into_iter()
        .map(|(rel, group)| {
            let stats = LevelStats {
                avg: mean(&group),
                stddev: stddev(&group),
                count: group.len(),
            };
            (rel, stats)
        })
        .collect()
}

/// `avg(level 3) - avg(level 0)`, or 0 when either level is absent.
pub fn separation(stats: &BTreeMap<u8, LevelStats>) -> f64 {
    match (stats.get(&3), stats.get(&0)) {
        (Some(top), Some(bottom)) => top.avg - bottom.avg,
        _ => 0.0,
    }
}

/// True relevances reordered by predicted score descending (ties by input
/// position). Empty when the slices differ in length.
pub fn relevances_in_predicted_order(true_relevances: &[u8], scores: &[f64]) -> Vec<f64> {
    if true_relevances.len() != scores.len() {
        return Vec::new();
    }
    let key = |i: usize| {
        if scores[i].is_nan() {
            f64::NEG_INFINITY
        } else {
            scores[i] + 0.0
        }
    };
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    order
        .into_iter()
        .map(|i| true_relevances[i] as f64)
        .collect()
}

pub fn evaluate(true_relevances: &[u8], predicted_scores: &[f64]) -> EvaluationResult {
    evaluate_at(true_relevances, predicted_scores, DEFAULT_NDCG_K)
}

pub fn evaluate_at(true_relevances: &[u8], predicted_scores: &[f64], k: usize) -> EvaluationResult {
    if true_relevances.is_empty() || true_relevances.len() != predicted_scores.len() {
        return EvaluationResult::undefined();
    }

    let truth: Vec<f64> = true_relevances.iter().map(|r| *r as f64).collect();
    let per_level_stats = level_stats(true_relevances, predicted_scores);
    let ranked = relevances_in_predicted_order(true_relevances, predicted_scores);

    EvaluationResult {
        spearman: spearman(&truth, predicted_scores),
        pearson: pearson(&truth, predicted_scores),
        separation: separation(&per_level_stats),
        ndcg: ndcg_at_k(&ranked, k),
        per_level_stats,
    }
}

/// Judgements for one query: index-aligned true relevances and scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryJudgements {
    pub query_id: String,
    pub relevances: Vec<u8>,
    pub scores: Vec<f64>,
}

/// Pools every query's pairs for the correlations and level statistics and
/// reports the mean per-query NDCG@k.
pub fn evaluate_grouped(queries: &[QueryJudgements], k: usize) -> EvaluationResult {
    let mut relevances = Vec::new();
    let mut scores = Vec::new();
    let mut ndcgs = Vec::new();

    for q in queries {
        if q.relevances.is_empty() || q.relevances.len() != q.scores.len() {
            continue;
        }
        relevances.extend_from_slice(&q.relevances);
        scores.extend_from_slice(&q.scores);
        let ranked = relevances_in_predicted_order(&q.relevances, &q.scores);
        ndcgs.push(ndcg_at_k(&ranked, k));
    }

    let mut result = evaluate_at(&relevances, &scores, k);
    if !ndcgs.is_empty() {
        result.ndcg = mean(&ndcgs);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_scenario() {
        let rel = [3, 3, 0, 0];
        let scores = [0.7, 0.8, 0.05, 0.15];
        let result = evaluate(&rel, &scores);

        assert!((result.per_level_stats[&3].avg - 0.75).abs() < 1e-9);
        assert!((result.per_level_stats[&0].avg - 0.10).abs() < 1e-9);
        assert!((result.separation - 0.65).abs() < 1e-6);
    }

    #[test]
    fn separation_defaults_to_zero_without_both_ends() {
        let result = evaluate(&[3, 2, 1], &[0.9, 0.5, 0.2]);
        assert_eq!(result.separation, 0.0);
        assert!(!result.per_level_stats.contains_key(&0));
    }

    #[test]
    fn empty_groups_are_omitted() {
        let result = evaluate(&[0, 3, 3], &[0.1, 0.8, 0.6]);
        let levels: Vec<u8> = result.per_level_stats.keys().copied().collect();
        assert_eq!(levels, vec![0, 3]);
        let top = result.per_level_stats[&3];
        assert_eq!(top.count, 2);
        assert!((top.stddev - 0.1).abs() < 1e-9);
    }

    #[test]
    fn predicted_order_guards_lengths() {
        assert!(relevances_in_predicted_order(&[1], &[0.1, 0.2]).is_empty());
        assert_eq!(
            relevances_in_predicted_order(&[1, 3], &[0.0, -0.0]),
            vec![1.0, 3.0]
        );
        assert_eq!(
            relevances_in_predicted_order(&[1, 3], &[0.2, 0.7]),
            vec![3.0, 1.0]
        );
    }

    #[test]
    fn perfect_ranking() {
        let result = evaluate(&[0, 1, 2, 3], &[0.1, 0.35, 0.55, 0.9]);
        assert!((result.spearman - 1.0).abs() < 1e-9);
        assert!(result.pearson > 0.9);
        assert!((result.ndcg - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_is_undefined_not_an_error() {
        let result = evaluate(&[], &[]);
        assert!(result.is_undefined());
        assert!(evaluate(&[1, 2], &[0.3]).is_undefined());
    }

    #[test]
    fn zero_variance_correlations_are_nan() {
        let result = evaluate(&[2, 2, 2], &[0.1, 0.5, 0.9]);
        assert!(result.spearman.is_nan());
        assert!(result.pearson.is_nan());
        assert_eq!(result.per_level_stats[&2].count, 3);
    }

    #[test]
    fn all_zero_relevance_gives_zero_ndcg() {
        let result = evaluate(&[0, 0, 0], &[0.9, 0.1, 0.5]);
        assert_eq!(result.ndcg, 0.0);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rel = [0, 1, 3, 2, 0, 3, 1];
        let scores = [0.12, 0.4, 0.77, 0.51, 0.33, 0.69, 0.2];
        let a = evaluate(&rel, &scores);
        let b = evaluate(&rel, &scores);
        assert!(a.same_as(&b));
        assert!(evaluate(&[], &[]).same_as(&evaluate(&[], &[])));
    }

    #[test]
    fn ndcg_uses_predicted_order() {
        let result = evaluate_at(&[3, 0], &[0.1, 0.9], 2);
        let expected = (0.0 + 3.0 / 3f64.log2()) / 3.0;
        assert!((result.ndcg - expected).abs() < 1e-9);
    }

    #[test]
    fn grouped_averages_ndcg_per_query() {
        let queries = vec![
            QueryJudgements {
                query_id: "q1".into(),
                relevances: vec![3, 0],
                scores: vec![0.9, 0.1],
            },
            QueryJudgements {
                query_id: "q2".into(),
                relevances: vec![0, 0],
                scores: vec![0.4, 0.3],
            },
            QueryJudgements {
                query_id: "empty".into(),
                relevances: vec![],
                scores: vec![],
            },
        ];
        let result = evaluate_grouped(&queries, 10);
        assert!((result.ndcg - 0.5).abs() < 1e-9);
        assert_eq!(result.per_level_stats[&0].count, 3);
        assert!(evaluate_grouped(&[], 10).is_undefined());
    }
}
