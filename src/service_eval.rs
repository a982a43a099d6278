//! End-to-end evaluation of a ranking service against relevance labels.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::group_by_query;
use crate::evaluate::{EvaluationResult, LevelStats, evaluate_at, level_stats};
use crate::metrics::{mean, ndcg_at_k};
use crate::model::JudgedPair;
use crate::service::CandidateRanker;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skipped {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceEvalOptions {
    pub k: usize,
    pub max_queries: usize,
    pub parallel: bool,
}

impl Default for ServiceEvalOptions {
    fn default() -> Self {
        Self {
            k: crate::evaluate::DEFAULT_NDCG_K,
            max_queries: 50,
            parallel: true,
        }
    }
}

/// Correlations use `-rank` as the predicted score, so per-level averages in
/// `result` are negated ranks; `avg_rank_by_level` carries the plain ranks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEvaluation {
    pub name: String,
    pub result: EvaluationResult,
    pub avg_rank_by_level: BTreeMap<u8, LevelStats>,
    pub queries_evaluated: usize,
    pub pairs_matched: usize,
    pub skipped: Vec<Skipped>,
}

struct QueryOutcome {
    relevances: Vec<u8>,
    ranks: Vec<f64>,
    ndcg: f64,
}

fn evaluate_query<R: CandidateRanker + ?Sized>(
    ranker: &R,
    query_id: &str,
    pairs: &[&JudgedPair],
    k: usize,
) -> Result<QueryOutcome, Skipped> {
    let text = pairs.first().map(|p| p.query_text.as_str()).unwrap_or_default();

    let returned = ranker.rank_candidates(text).map_err(|err| Skipped {
        id: query_id.to_string(),
        reason: err.to_string(),
    })?;
    if returned.is_empty() {
        return Err(Skipped {
            id: query_id.to_string(),
            reason: "no candidates returned".to_string(),
        });
    }

    let judged: HashMap<&str, u8> = pairs
        .iter()
        .map(|p| (p.product_id.as_str(), p.relevance))
        .collect();
    let position: HashMap<&str, usize> = returned
        .iter()
        .enumerate()
        .rev()
        .map(|(i, id)| (id.as_str(), i + 1))
        .collect();

    let mut relevances = Vec::new();
    let mut ranks = Vec::new();
    for pair in pairs {
        if let Some(rank) = position.get(pair.product_id.as_str()) {
            relevances.push(pair.relevance);
            ranks.push(*rank as f64);
        }
    }

    let returned_relevances: Vec<f64> = returned
        .iter()
        .map(|id| judged.get(id.as_str()).copied().unwrap_or(0) as f64)
        .collect();

    Ok(QueryOutcome {
        relevances,
        ranks,
        ndcg: ndcg_at_k(&returned_relevances, k),
    })
}

/// Runs every judged query (the first `max_queries`, in the order they
/// appear in `pairs`) through the ranker. Failed or empty queries are
/// skipped and recorded.
pub fn evaluate_service<R: CandidateRanker + Sync + ?Sized>(
    name: &str,
    ranker: &R,
    pairs: &[JudgedPair],
    opts: ServiceEvalOptions,
) -> ServiceEvaluation {
    let groups = group_by_query(pairs);
    let queries = &groups[..groups.len().min(opts.max_queries)];
    info!(name, queries = queries.len(), "evaluating ranking service");

    let run = |(query_id, group): &(String, Vec<&JudgedPair>)| {
        evaluate_query(ranker, query_id, group, opts.k)
    };
    let outcomes: Vec<Result<QueryOutcome, Skipped>> = if opts.parallel {
        queries.par_iter().map(run).collect()
    } else {
        queries.iter().map(run).collect()
    };

    let mut relevances = Vec::new();
    let mut neg_ranks = Vec::new();
    let mut ranks = Vec::new();
    let mut ndcgs = Vec::new();
    let mut skipped = Vec::new();

    for outcome in outcomes {
        match outcome {
            Ok(q) => {
                relevances.extend_from_slice(&q.relevances);
                neg_ranks.extend(q.ranks.iter().map(|r| -r));
                ranks.extend_from_slice(&q.ranks);
                ndcgs.push(q.ndcg);
            }
            Err(skip) => {
                warn!(query_id = %skip.id, reason = %skip.reason, "skipping query");
                skipped.push(skip);
            }
        }
    }

    let mut result = evaluate_at(&relevances, &neg_ranks, opts.k);
    result.ndcg = if ndcgs.is_empty() { f64::NAN } else { mean(&ndcgs) };

    info!(
        name,
        evaluated = ndcgs.len(),
        skipped = skipped.len(),
        pairs_matched = relevances.len(),
        "service evaluation finished"
    );

    ServiceEvaluation {
        name: name.to_string(),
        avg_rank_by_level: level_stats(&relevances, &ranks),
        result,
        queries_evaluated: ndcgs.len(),
        pairs_matched: relevances.len(),
        skipped,
    }
}
