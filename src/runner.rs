use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Command, DataArgs};
use crate::config::Config;
use crate::dataset::{self, JoinOutcome};
use crate::encoder::{Encoder, EncoderSpec, FixtureEncoder, ModelInfo};
use crate::error::{RelevanceError, Result};
use crate::evaluate::{EvaluationResult, QueryJudgements, evaluate_grouped};
use crate::fusion::FusedRanker;
use crate::model::{Embedding, JudgedPair, Product, Query};
use crate::predict::{PredictOptions, generate_predictions};
use crate::report::{Comparison, ExampleChanges, compare, example_changes};
use crate::scoring::similarity;
use crate::search::{SearchRun, search_catalog};
use crate::service::{
    BackendClient, CandidateRanker, EncoderRanker, EncoderReranker, RerankClient, RerankedRanker,
    Reranker,
};
use crate::service_eval::{ServiceEvalOptions, ServiceEvaluation, Skipped, evaluate_service};
use crate::submission::{self, ValidationReport};

/// Similarity of every pair; `None` where either side could not be encoded.
#[derive(Debug, Clone, Default)]
pub struct PairScores {
    pub scores: Vec<Option<f64>>,
    pub skipped: Vec<Skipped>,
}

fn encode_texts<E: Encoder + ?Sized>(
    encoder: &E,
    texts: &[&str],
    batch_size: usize,
) -> Result<HashMap<String, std::result::Result<Embedding, String>>> {
    let mut cache = HashMap::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size.max(1)) {
        match encoder.embed_many(chunk) {
            Ok(vectors) => {
                for (text, v) in chunk.iter().zip(vectors) {
                    cache.insert(text.to_string(), Ok(v));
                }
            }
            Err(err) if err.is_recoverable() => {
                debug!(%err, "batch encoding failed, retrying one by one");
                for text in chunk {
                    let outcome = match encoder.embed_one(text) {
                        Ok(v) => Ok(v),
                        Err(err) if err.is_recoverable() => Err(err.to_string()),
                        Err(err) => return Err(err),
                    };
                    cache.insert(text.to_string(), outcome);
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok(cache)
}

/// Encodes each distinct query and product text once, then scores every
/// pair by cosine similarity.
pub fn score_pairs<E: Encoder + ?Sized>(
    encoder: &E,
    pairs: &[JudgedPair],
    batch_size: usize,
) -> Result<PairScores> {
    let mut texts: Vec<&str> = Vec::new();
    let mut seen = HashSet::new();
    for pair in pairs {
        for text in [pair.query_text.as_str(), pair.product_text.as_str()] {
            if seen.insert(text) {
                texts.push(text);
            }
        }
    }
    info!(
        encoder = %encoder.name(),
        texts = texts.len(),
        pairs = pairs.len(),
        "encoding texts"
    );
    let cache = encode_texts(encoder, &texts, batch_size)?;

    let mut out = PairScores::default();
    for pair in pairs {
        let q = cache.get(pair.query_text.as_str());
        let p = cache.get(pair.product_text.as_str());
        match (q, p) {
            (Some(Ok(q)), Some(Ok(p))) => out.scores.push(Some(similarity(q, p) as f64)),
            (q, p) => {
                let reason = [q, p]
                    .into_iter()
                    .find_map(|r| match r {
                        Some(Err(reason)) => Some(reason.clone()),
                        _ => None,
                    })
                    .unwrap_or_else(|| "not encoded".to_string());
                out.skipped.push(Skipped {
                    id: format!("{}/{}", pair.query_id, pair.product_id),
                    reason,
                });
                out.scores.push(None);
            }
        }
    }

    if !out.skipped.is_empty() {
        warn!(skipped = out.skipped.len(), "pairs left unscored");
    }
    Ok(out)
}

/// Embeddings of `texts` as a fixture table; texts the encoder could not
/// handle are left out and recorded.
pub fn export_embeddings<E: Encoder + ?Sized>(
    encoder: &E,
    texts: &[&str],
    batch_size: usize,
) -> Result<(FixtureEncoder, Vec<Skipped>)> {
    let mut cache = encode_texts(encoder, texts, batch_size)?;
    let mut fixture = FixtureEncoder::new(encoder.name());
    let mut skipped = Vec::new();

    for text in texts {
        match cache.remove(*text) {
            Some(Ok(vector)) => fixture.insert(*text, vector)?,
            Some(Err(reason)) => skipped.push(Skipped {
                id: text.to_string(),
                reason,
            }),
            None => {}
        }
    }
    if !skipped.is_empty() {
        warn!(skipped = skipped.len(), "texts left out of the export");
    }
    Ok((fixture, skipped))
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEvaluation {
    pub name: String,
    pub ndcg_k: usize,
    pub result: EvaluationResult,
    pub pairs_scored: usize,
    pub skipped: Vec<Skipped>,
    #[serde(skip)]
    pub scores: Vec<Option<f64>>,
}

fn judgements(pairs: &[JudgedPair], scores: &[Option<f64>]) -> Vec<QueryJudgements> {
    let mut by_query: BTreeMap<&str, QueryJudgements> = BTreeMap::new();
    for (pair, score) in pairs.iter().zip(scores) {
        let Some(score) = score else { continue };
        let q = by_query
            .entry(pair.query_id.as_str())
            .or_insert_with(|| QueryJudgements {
                query_id: pair.query_id.clone(),
                ..QueryJudgements::default()
            });
        q.relevances.push(pair.relevance);
        q.scores.push(*score);
    }
    by_query.into_values().collect()
}

pub fn evaluate_encoder<E: Encoder + ?Sized>(
    name: &str,
    encoder: &E,
    pairs: &[JudgedPair],
    ndcg_k: usize,
    batch_size: usize,
) -> Result<ModelEvaluation> {
    let PairScores { scores, skipped } = score_pairs(encoder, pairs, batch_size)?;
    let result = evaluate_grouped(&judgements(pairs, &scores), ndcg_k);
    let pairs_scored = scores.iter().filter(|s| s.is_some()).count();
    info!(name, pairs_scored, spearman = result.spearman, "model evaluated");

    Ok(ModelEvaluation {
        name: name.to_string(),
        ndcg_k,
        result,
        pairs_scored,
        skipped,
        scores,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRun {
    pub baseline: ModelEvaluation,
    pub candidate: ModelEvaluation,
    pub comparison: Comparison,
    pub examples: ExampleChanges,
}

pub fn compare_encoders<B: Encoder + ?Sized, C: Encoder + ?Sized>(
    (baseline_name, baseline): (&str, &B),
    (candidate_name, candidate): (&str, &C),
    pairs: &[JudgedPair],
    config: &Config,
) -> Result<ComparisonRun> {
    let eval = &config.evaluation;
    let base = evaluate_encoder(baseline_name, baseline, pairs, eval.ndcg_k, eval.batch_size)?;
    let cand = evaluate_encoder(candidate_name, candidate, pairs, eval.ndcg_k, eval.batch_size)?;

    Ok(ComparisonRun {
        comparison: compare(baseline_name, &base.result, candidate_name, &cand.result),
        examples: example_changes(pairs, &base.scores, &cand.scores, eval.examples),
        baseline: base,
        candidate: cand,
    })
}

/// Textual ranking service selector: `backend`, `backend:<url>`,
/// `backend:<url>#<table>`, `encoder:<encoder>` or
/// `hybrid:<dense encoder>|<sparse encoder>`.
#[derive(Debug, Clone, PartialEq)]
pub enum RankerSpec {
    Backend {
        base_url: Option<String>,
        table: Option<String>,
    },
    Encoder(EncoderSpec),
    Hybrid {
        dense: EncoderSpec,
        sparse: EncoderSpec,
    },
}

impl FromStr for RankerSpec {
    type Err = RelevanceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "backend" {
            return Ok(RankerSpec::Backend {
                base_url: None,
                table: None,
            });
        }
        if let Some(rest) = s.strip_prefix("backend:") {
            let (url, table) = match rest.split_once('#') {
                Some((url, table)) => (url, Some(table.to_string())),
                None => (rest, None),
            };
            return Ok(RankerSpec::Backend {
                base_url: (!url.is_empty()).then(|| url.to_string()),
                table: table.filter(|t| !t.is_empty()),
            });
        }
        if let Some(rest) = s.strip_prefix("encoder:") {
            return Ok(RankerSpec::Encoder(rest.parse()?));
        }
        if let Some(rest) = s.strip_prefix("hybrid:") {
            let (dense, sparse) = rest.split_once('|').ok_or_else(|| {
                RelevanceError::InvalidArg(format!("hybrid ranker needs '<dense>|<sparse>': {rest}"))
            })?;
            return Ok(RankerSpec::Hybrid {
                dense: dense.parse()?,
                sparse: sparse.parse()?,
            });
        }
        Err(RelevanceError::InvalidArg(format!(
            "unknown ranker '{s}' (expected backend[:<url>[#<table>]], encoder:<encoder> or hybrid:<dense>|<sparse>)"
        )))
    }
}

impl fmt::Display for RankerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankerSpec::Backend { base_url, table } => {
                write!(f, "backend")?;
                if let Some(url) = base_url {
                    write!(f, ":{url}")?;
                }
                if let Some(table) = table {
                    write!(f, "#{table}")?;
                }
                Ok(())
            }
            RankerSpec::Encoder(spec) => write!(f, "encoder:{spec}"),
            RankerSpec::Hybrid { dense, sparse } => write!(f, "hybrid:{dense}|{sparse}"),
        }
    }
}

/// How candidates get reranked: a cross-encoder service URL, or embedding
/// similarity from a local or remote encoder.
#[derive(Debug, Clone, PartialEq)]
pub enum RerankerSpec {
    Service(String),
    Encoder(EncoderSpec),
}

impl RerankerSpec {
    /// `--rerank-encoder` wins over `--rerank-url`, which wins over the
    /// configured rerank URL.
    pub fn resolve(
        url: Option<&String>,
        encoder: Option<&EncoderSpec>,
        config: &Config,
    ) -> Option<Self> {
        if let Some(enc) = encoder {
            return Some(RerankerSpec::Encoder(enc.clone()));
        }
        url.or(config.service.rerank_url.as_ref())
            .map(|u| RerankerSpec::Service(u.clone()))
    }
}

type BoxedRanker = Box<dyn CandidateRanker + Send + Sync>;

fn encoder_ranker(
    spec: &EncoderSpec,
    products: &[Product],
    config: &Config,
    timeout: Duration,
) -> Result<EncoderRanker<Box<dyn Encoder + Send + Sync>>> {
    let encoder = spec.build(&config.service.embed_url, timeout)?;
    let limit = config.service.rerank_depth.max(config.fusion.limit);
    Ok(EncoderRanker::build(encoder, products, config.evaluation.batch_size)?.with_limit(limit))
}

/// Builds the ranking service described by `spec`, wrapped in a reranker
/// when `rerank` is set.
pub fn build_ranker(
    spec: &RankerSpec,
    products: &[Product],
    rerank: Option<&RerankerSpec>,
    config: &Config,
    timeout: Duration,
) -> Result<BoxedRanker> {
    let service = &config.service;
    let ranker: BoxedRanker = match spec {
        RankerSpec::Backend { base_url, table } => Box::new(BackendClient::new(
            base_url.as_deref().unwrap_or(&service.backend_url),
            table.as_deref().unwrap_or(&service.table),
            timeout,
        )?),
        RankerSpec::Encoder(enc) => Box::new(encoder_ranker(enc, products, config, timeout)?),
        RankerSpec::Hybrid { dense, sparse } => {
            let fusion = &config.fusion;
            Box::new(
                FusedRanker::new(fusion.k, fusion.limit)
                    .with_member(
                        fusion.dense_weight,
                        encoder_ranker(dense, products, config, timeout)?,
                    )
                    .with_member(
                        fusion.sparse_weight,
                        encoder_ranker(sparse, products, config, timeout)?,
                    ),
            )
        }
    };

    let Some(rerank) = rerank else {
        return Ok(ranker);
    };
    let reranker: Box<dyn Reranker + Send + Sync> = match rerank {
        RerankerSpec::Service(url) => Box::new(RerankClient::new(url, timeout)?),
        RerankerSpec::Encoder(enc) => {
            Box::new(EncoderReranker::new(enc.build(&service.embed_url, timeout)?))
        }
    };
    let texts: HashMap<String, String> = products
        .iter()
        .map(|p| (p.id.clone(), p.search_text()))
        .collect();
    Ok(Box::new(
        RerankedRanker::new(ranker, reranker, texts).with_depth(service.rerank_depth),
    ))
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceRun {
    pub ndcg_k: usize,
    pub baseline: ServiceEvaluation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<ServiceEvaluation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionSummary {
    pub output: String,
    pub queries: usize,
    pub predictions: usize,
    pub distribution: BTreeMap<u8, usize>,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionSummary {
    pub output: String,
    pub validation: ValidationReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseSummary {
    pub output: String,
    pub queries: usize,
    pub validation: ValidationReport,
    pub skipped: Vec<Skipped>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingSummary {
    pub output: String,
    pub encoder: String,
    pub texts: usize,
    pub dimension: usize,
    pub skipped: Vec<Skipped>,
}

/// Outcome of one subcommand, rendered by `output::print_report`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Report {
    Evaluation(ModelEvaluation),
    Comparison(Box<ComparisonRun>),
    Service(Box<ServiceRun>),
    Predictions(PredictionSummary),
    Submission(SubmissionSummary),
    Search(SearchRun),
    Responses(ResponseSummary),
    Embeddings(EmbeddingSummary),
    ModelInfo(ModelInfo),
}

fn load_pairs(
    data: &DataArgs,
    all: bool,
    config: &Config,
) -> Result<(Vec<Product>, Vec<JudgedPair>)> {
    let queries = dataset::load_queries(&data.queries)?;
    let products = dataset::load_products(&data.products)?;
    let labels = dataset::load_labels(&data.labels)?;

    let JoinOutcome { pairs, .. } = dataset::join_labels(&queries, &products, &labels);
    if all {
        return Ok((products, pairs));
    }

    let eval = &config.evaluation;
    let (train, test) = dataset::holdout(pairs, eval.test_fraction, eval.split_seed);
    info!(train = train.len(), test = test.len(), "split labeled pairs");
    Ok((products, test))
}

fn effective_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(timeout) = &cli.timeout {
        config.service.timeout_ms = timeout.as_ref().as_millis() as u64;
    }
    config.validate()?;
    Ok(config)
}

pub fn run_command(cli: &Cli) -> Result<Report> {
    cli.validate().map_err(RelevanceError::InvalidArg)?;
    let mut config = effective_config(cli)?;
    let timeout = config.service.timeout();

    match &cli.command {
        Command::Evaluate {
            data,
            encoder,
            all,
            ndcg_k,
        } => {
            if let Some(k) = ndcg_k {
                config.evaluation.ndcg_k = *k;
            }
            let (_, pairs) = load_pairs(data, *all, &config)?;
            let model = encoder.build(&config.service.embed_url, timeout)?;
            let eval = &config.evaluation;
            let evaluation = evaluate_encoder(
                &encoder.to_string(),
                &model,
                &pairs,
                eval.ndcg_k,
                eval.batch_size,
            )?;
            Ok(Report::Evaluation(evaluation))
        }
        Command::Compare {
            data,
            baseline,
            candidate,
            all,
            examples,
        } => {
            if let Some(n) = examples {
                config.evaluation.examples = *n;
            }
            let (_, pairs) = load_pairs(data, *all, &config)?;
            let (base_name, cand_name) = (baseline.to_string(), candidate.to_string());
            let embed_url = &config.service.embed_url;
            let base = baseline.build(embed_url, timeout)?;
            let cand = candidate.build(embed_url, timeout)?;
            let run = compare_encoders(
                (base_name.as_str(), &base),
                (cand_name.as_str(), &cand),
                &pairs,
                &config,
            )?;
            Ok(Report::Comparison(Box::new(run)))
        }
        Command::Predict {
            queries,
            products,
            encoder,
            out,
            products_per_query,
        } => {
            let queries = dataset::load_queries(queries)?;
            let products = dataset::load_products(products)?;
            let opts = PredictOptions {
                products_per_query: products_per_query
                    .unwrap_or(config.predict.products_per_query),
                batch_size: config.evaluation.batch_size,
                thresholds: config.relevance,
            };
            let model = encoder.build(&config.service.embed_url, timeout)?;
            let run = generate_predictions(model, &queries, &products, &opts)?;
            dataset::save_json_array(out, &run.predictions)?;
            info!(path = %out.display(), "saved predictions");

            Ok(Report::Predictions(PredictionSummary {
                output: out.display().to_string(),
                queries: run.queries,
                predictions: run.predictions.len(),
                distribution: run.distribution(),
                skipped: run.skipped,
            }))
        }
        Command::Submit {
            predictions,
            out,
            min_per_query,
        } => {
            let min = min_per_query.unwrap_or(config.submission.min_products_per_query);
            let validation = convert_file(predictions, out, min)?;
            Ok(Report::Submission(SubmissionSummary {
                output: out.display().to_string(),
                validation,
            }))
        }
        Command::ServiceEval {
            data,
            ranker,
            candidate_ranker,
            rerank_url,
            rerank_encoder,
            max_queries,
            sequential,
            all,
        } => {
            let (products, pairs) = load_pairs(data, *all, &config)?;
            let rerank =
                RerankerSpec::resolve(rerank_url.as_ref(), rerank_encoder.as_ref(), &config);
            let opts = ServiceEvalOptions {
                k: config.evaluation.ndcg_k,
                max_queries: max_queries.unwrap_or(config.service.max_queries),
                parallel: config.service.parallel && !*sequential,
            };

            let base = build_ranker(ranker, &products, rerank.as_ref(), &config, timeout)?;
            let baseline = evaluate_service(&ranker.to_string(), &base, &pairs, opts);

            let (candidate, comparison) = match candidate_ranker {
                Some(spec) => {
                    let cand = build_ranker(spec, &products, rerank.as_ref(), &config, timeout)?;
                    let eval = evaluate_service(&spec.to_string(), &cand, &pairs, opts);
                    let cmp = compare(&baseline.name, &baseline.result, &eval.name, &eval.result);
                    (Some(eval), Some(cmp))
                }
                None => (None, None),
            };

            Ok(Report::Service(Box::new(ServiceRun {
                ndcg_k: opts.k,
                baseline,
                candidate,
                comparison,
            })))
        }
        Command::Search {
            products,
            query,
            encoder,
            top_k,
            fields,
        } => {
            let products = dataset::load_products(products)?;
            let model = encoder.build(&config.service.embed_url, timeout)?;
            let run = search_catalog(
                model,
                &products,
                query,
                *top_k,
                fields,
                config.evaluation.batch_size,
            )?;
            Ok(Report::Search(run))
        }
        Command::Respond {
            queries,
            products,
            ranker,
            rerank_url,
            rerank_encoder,
            out,
            min_per_query,
            sequential,
        } => {
            let queries = dataset::load_queries(queries)?;
            let products = match products {
                Some(path) => dataset::load_products(path)?,
                None => Vec::new(),
            };
            let rerank =
                RerankerSpec::resolve(rerank_url.as_ref(), rerank_encoder.as_ref(), &config);
            let service = build_ranker(ranker, &products, rerank.as_ref(), &config, timeout)?;
            let parallel = config.service.parallel && !*sequential;
            let run = submission::collect_responses(&service, &queries, parallel);
            let validation = submission::save_submission(out, &run.entries, *min_per_query)?;

            Ok(Report::Responses(ResponseSummary {
                output: out.display().to_string(),
                queries: run.queries,
                validation,
                skipped: run.skipped,
            }))
        }
        Command::Embed {
            queries,
            products,
            texts,
            encoder,
            out,
        } => {
            let queries: Vec<Query> = match queries {
                Some(path) => dataset::load_queries(path)?,
                None => Vec::new(),
            };
            let products: Vec<Product> = match products {
                Some(path) => dataset::load_products(path)?,
                None => Vec::new(),
            };
            let product_texts: Vec<String> = products.iter().map(Product::search_text).collect();

            let mut seen = HashSet::new();
            let all_texts: Vec<&str> = queries
                .iter()
                .map(|q| q.text.as_str())
                .chain(product_texts.iter().map(String::as_str))
                .chain(texts.iter().map(String::as_str))
                .filter(|t| seen.insert(*t))
                .collect();

            let model = encoder.build(&config.service.embed_url, timeout)?;
            let (fixture, skipped) =
                export_embeddings(&model, &all_texts, config.evaluation.batch_size)?;
            fixture.save(out)?;

            Ok(Report::Embeddings(EmbeddingSummary {
                output: out.display().to_string(),
                encoder: fixture.name(),
                texts: fixture.len(),
                dimension: fixture.dim(),
                skipped,
            }))
        }
        Command::ModelInfo { encoder } => {
            let info = encoder.model_info(&config.service.embed_url, timeout)?;
            Ok(Report::ModelInfo(info))
        }
    }
}

fn convert_file(predictions: &Path, out: &Path, min_per_query: usize) -> Result<ValidationReport> {
    let predictions = dataset::load_labels(predictions)?;
    let entries = submission::convert_predictions(&predictions);
    submission::save_submission(out, &entries, min_per_query)
}
