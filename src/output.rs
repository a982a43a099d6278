use std::fmt::Write as _;
use std::io::{self, Write};

use crate::error::{RelevanceError, Result};
use crate::report::{render_comparison, render_evaluation, render_examples};
use crate::runner::{Report, ServiceRun};
use crate::search::SearchRun;
use crate::service_eval::{ServiceEvaluation, Skipped};

pub fn print_report(format: &str, report: &Report) -> Result<()> {
    match format {
        "text" => {
            let mut out = io::stdout();
            write!(out, "{}", render_text(report))?;
            Ok(())
        }
        "json" => {
            let out = serde_json::to_string_pretty(report)?;
            println!("{out}");
            Ok(())
        }
        other => Err(RelevanceError::InvalidArg(format!(
            "Unknown output format: {other}"
        ))),
    }
}

fn skipped_line(out: &mut String, skipped: &[Skipped]) {
    if !skipped.is_empty() {
        let _ = writeln!(out, "Skipped: {}", skipped.len());
    }
}

fn service_text(out: &mut String, eval: &ServiceEvaluation, ndcg_k: usize) {
    out.push_str(&render_evaluation(&eval.name, &eval.result, ndcg_k));
    let _ = writeln!(
        out,
        "Queries evaluated: {}  Pairs matched: {}",
        eval.queries_evaluated, eval.pairs_matched
    );
    for (level, stats) in &eval.avg_rank_by_level {
        let _ = writeln!(
            out,
            "Relevance {level}: avg rank {:.1} ({} products)",
            stats.avg, stats.count
        );
    }
    skipped_line(out, &eval.skipped);
}

fn search_text(out: &mut String, run: &SearchRun) {
    let _ = writeln!(out, "Query: {}", run.query);
    let _ = writeln!(out, "Encoder: {}", run.encoder);
    for hit in &run.hits {
        let title = hit
            .fields
            .get("title")
            .map(String::as_str)
            .unwrap_or(hit.product_id.as_str());
        let _ = writeln!(out, "{}. [{:.4}] {title}", hit.rank, hit.score);
        for (name, value) in hit.fields.iter().filter(|(name, _)| *name != "title") {
            let _ = writeln!(out, "   {name}: {value}");
        }
    }
    if run.hits.is_empty() {
        let _ = writeln!(out, "No results");
    }
}

pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    match report {
        Report::Evaluation(eval) => {
            out.push_str(&render_evaluation(&eval.name, &eval.result, eval.ndcg_k));
            let _ = writeln!(out, "Pairs scored: {}", eval.pairs_scored);
            skipped_line(&mut out, &eval.skipped);
        }
        Report::Comparison(run) => {
            let ndcg_k = run.baseline.ndcg_k;
            out.push_str(&render_evaluation(&run.baseline.name, &run.baseline.result, ndcg_k));
            out.push('\n');
            out.push_str(&render_evaluation(&run.candidate.name, &run.candidate.result, ndcg_k));
            out.push('\n');
            out.push_str(&render_comparison(&run.comparison, ndcg_k));
            out.push_str(&render_examples(&run.examples));
        }
        Report::Service(run) => {
            let ServiceRun {
                ndcg_k,
                baseline,
                candidate,
                comparison,
            } = run.as_ref();
            let ndcg_k = *ndcg_k;
            service_text(&mut out, baseline, ndcg_k);
            if let Some(candidate) = candidate {
                out.push('\n');
                service_text(&mut out, candidate, ndcg_k);
            }
            if let Some(cmp) = comparison {
                out.push('\n');
                out.push_str(&render_comparison(cmp, ndcg_k));
            }
        }
        Report::Predictions(summary) => {
            let _ = writeln!(
                out,
                "Saved {} predictions for {} queries to {}",
                summary.predictions, summary.queries, summary.output
            );
            let _ = writeln!(out, "Relevance distribution:");
            for (level, count) in &summary.distribution {
                let pct = if summary.predictions > 0 {
                    *count as f64 / summary.predictions as f64 * 100.0
                } else {
                    0.0
                };
                let _ = writeln!(out, "  Relevance {level}: {count} ({pct:.1}%)");
            }
            skipped_line(&mut out, &summary.skipped);
        }
        Report::Submission(summary) => {
            let v = &summary.validation;
            let _ = writeln!(
                out,
                "Saved {} entries for {} queries to {}",
                v.entries, v.queries, summary.output
            );
            let _ = writeln!(out, "Validation: passed");
        }
        Report::Search(run) => search_text(&mut out, run),
        Report::Responses(summary) => {
            let v = &summary.validation;
            let _ = writeln!(
                out,
                "Saved {} rows for {} of {} queries to {}",
                v.entries, v.queries, summary.queries, summary.output
            );
            skipped_line(&mut out, &summary.skipped);
        }
        Report::Embeddings(summary) => {
            let _ = writeln!(
                out,
                "Saved {} embeddings (dimension {}) from {} to {}",
                summary.texts, summary.dimension, summary.encoder, summary.output
            );
            skipped_line(&mut out, &summary.skipped);
        }
        Report::ModelInfo(info) => {
            let _ = writeln!(out, "Model: {}", info.model_name);
            if !info.model_path.is_empty() {
                let _ = writeln!(out, "Path: {}", info.model_path);
            }
            let _ = writeln!(out, "Embedding dimension: {}", info.embedding_dimension);
        }
    }
    out
}
