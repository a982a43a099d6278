//! Conversion of relevance predictions into ranked submission rows.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::dataset::save_json_array;
use crate::error::{RelevanceError, Result};
use crate::model::{Prediction, Query, RankedEntry};
use crate::service::CandidateRanker;
use crate::service_eval::Skipped;

pub const DEFAULT_MIN_PER_QUERY: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmissionProblem {
    RanksNotSequential { query_id: String, ranks: Vec<u32> },
    TooFewCandidates { query_id: String, count: usize, min: usize },
}

impl SubmissionProblem {
    pub fn query_id(&self) -> &str {
        match self {
            SubmissionProblem::RanksNotSequential { query_id, .. }
            | SubmissionProblem::TooFewCandidates { query_id, .. } => query_id,
        }
    }
}

impl fmt::Display for SubmissionProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionProblem::RanksNotSequential { query_id, ranks } => {
                write!(f, "query {query_id}: ranks not sequential ({ranks:?})")
            }
            SubmissionProblem::TooFewCandidates {
                query_id,
                count,
                min,
            } => write!(
                f,
                "query {query_id}: only {count} products, need at least {min}"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub queries: usize,
    pub entries: usize,
    pub problems: Vec<SubmissionProblem>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Per query (in query-id order), predictions are stably sorted by
/// relevance descending and numbered from 1. Equal relevances keep their
/// order from the input.
pub fn convert_predictions(predictions: &[Prediction]) -> Vec<RankedEntry> {
    let mut by_query: BTreeMap<&str, Vec<&Prediction>> = BTreeMap::new();
    for p in predictions {
        by_query.entry(p.query_id.as_str()).or_default().push(p);
    }

    let mut entries = Vec::with_capacity(predictions.len());
    for (query_id, mut group) in by_query {
        group.sort_by(|a, b| b.relevance.cmp(&a.relevance));
        entries.extend(group.into_iter().enumerate().map(|(i, p)| RankedEntry {
            query_id: query_id.to_string(),
            rank: i as u32 + 1,
            product_id: p.product_id.clone(),
        }));
    }
    entries
}

pub fn validate_submission(entries: &[RankedEntry], min_per_query: usize) -> ValidationReport {
    let mut ranks: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for e in entries {
        ranks.entry(e.query_id.as_str()).or_default().push(e.rank);
    }

    let mut problems = Vec::new();
    for (query_id, query_ranks) in ranks.iter_mut() {
        query_ranks.sort_unstable();
        let sequential = query_ranks
            .iter()
            .enumerate()
            .all(|(i, r)| *r as usize == i + 1);
        if !sequential {
            problems.push(SubmissionProblem::RanksNotSequential {
                query_id: query_id.to_string(),
                ranks: query_ranks.clone(),
            });
        }
        if query_ranks.len() < min_per_query {
            problems.push(SubmissionProblem::TooFewCandidates {
                query_id: query_id.to_string(),
                count: query_ranks.len(),
                min: min_per_query,
            });
        }
    }

    ValidationReport {
        queries: ranks.len(),
        entries: entries.len(),
        problems,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResponseRun {
    pub entries: Vec<RankedEntry>,
    pub queries: usize,
    pub skipped: Vec<Skipped>,
}

/// Asks `ranker` about every query and numbers the returned ids from 1 in
/// the order the service gave them. Queries that fail or come back empty
/// are skipped.
pub fn collect_responses<R: CandidateRanker + Sync + ?Sized>(
    ranker: &R,
    queries: &[Query],
    parallel: bool,
) -> ResponseRun {
    let ask = |query: &Query| -> std::result::Result<Vec<RankedEntry>, Skipped> {
        let skip = |reason: String| Skipped {
            id: query.id.clone(),
            reason,
        };
        let ids = ranker
            .rank_candidates(&query.text)
            .map_err(|err| skip(err.to_string()))?;
        if ids.is_empty() {
            return Err(skip("no candidates returned".to_string()));
        }
        Ok(ids
            .into_iter()
            .enumerate()
            .map(|(i, product_id)| RankedEntry {
                query_id: query.id.clone(),
                rank: i as u32 + 1,
                product_id,
            })
            .collect())
    };
    let answers: Vec<_> = if parallel {
        queries.par_iter().map(ask).collect()
    } else {
        queries.iter().map(ask).collect()
    };

    let mut run = ResponseRun {
        queries: queries.len(),
        ..ResponseRun::default()
    };
    for answer in answers {
        match answer {
            Ok(rows) => run.entries.extend(rows),
            Err(skip) => {
                warn!(query_id = %skip.id, reason = %skip.reason, "no response for query");
                run.skipped.push(skip);
            }
        }
    }
    info!(
        queries = run.queries,
        rows = run.entries.len(),
        skipped = run.skipped.len(),
        "collected service responses"
    );
    run
}

/// Writes the submission only when it validates.
pub fn save_submission(
    path: &Path,
    entries: &[RankedEntry],
    min_per_query: usize,
) -> Result<ValidationReport> {
    let report = validate_submission(entries, min_per_query);
    if !report.is_valid() {
        for problem in &report.problems {
            warn!(%problem, "invalid submission");
        }
        return Err(RelevanceError::MalformedRankSequence(report.problems));
    }

    save_json_array(path, entries)?;
    info!(
        path = %path.display(),
        queries = report.queries,
        entries = report.entries,
        "saved submission"
    );
    Ok(report)
}
