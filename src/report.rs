//! Baseline-versus-candidate comparison and its text rendering.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::evaluate::EvaluationResult;
use crate::model::JudgedPair;
use crate::relevance::MAX_RELEVANCE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Excellent,
    Significant,
    Moderate,
    Small,
    None,
}

impl Assessment {
    /// Buckets a Spearman improvement. NaN falls in `None`.
    pub fn from_spearman_delta(delta: f64) -> Self {
        if delta > 0.10 {
            Assessment::Excellent
        } else if delta > 0.05 {
            Assessment::Significant
        } else if delta > 0.02 {
            Assessment::Moderate
        } else if delta > 0.0 {
            Assessment::Small
        } else {
            Assessment::None
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Assessment::Excellent => "EXCELLENT improvement: fine-tuning is working very well.",
            Assessment::Significant => "SIGNIFICANT improvement: fine-tuning is effective.",
            Assessment::Moderate => "MODERATE improvement: fine-tuning is helping.",
            Assessment::Small => "SMALL improvement: consider more training or data.",
            Assessment::None => "NO improvement: check the training setup.",
        }
    }
}

impl fmt::Display for Assessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Assessment::Excellent => "excellent",
            Assessment::Significant => "significant",
            Assessment::Moderate => "moderate",
            Assessment::Small => "small",
            Assessment::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: String,
    pub baseline: f64,
    pub candidate: f64,
    pub delta: f64,
    pub percent: f64,
}

impl MetricDelta {
    pub fn new(metric: &str, baseline: f64, candidate: f64) -> Self {
        let delta = candidate - baseline;
        let percent = if baseline == 0.0 || baseline.is_nan() {
            0.0
        } else {
            delta / baseline.abs() * 100.0
        };
        Self {
            metric: metric.to_string(),
            baseline,
            candidate,
            delta,
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelDelta {
    pub relevance: u8,
    pub baseline: Option<f64>,
    pub candidate: Option<f64>,
}

impl LevelDelta {
    pub fn change(&self) -> Option<f64> {
        Some(self.candidate? - self.baseline?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub baseline_name: String,
    pub candidate_name: String,
    pub metrics: Vec<MetricDelta>,
    pub levels: Vec<LevelDelta>,
    pub assessment: Assessment,
}

impl Comparison {
    pub fn metric(&self, name: &str) -> Option<&MetricDelta> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

pub fn compare(
    baseline_name: &str,
    baseline: &EvaluationResult,
    candidate_name: &str,
    candidate: &EvaluationResult,
) -> Comparison {
    let metrics = vec![
        MetricDelta::new("spearman", baseline.spearman, candidate.spearman),
        MetricDelta::new("pearson", baseline.pearson, candidate.pearson),
        MetricDelta::new("separation", baseline.separation, candidate.separation),
        MetricDelta::new("ndcg", baseline.ndcg, candidate.ndcg),
    ];

    let levels = (0..=MAX_RELEVANCE)
        .map(|rel| LevelDelta {
            relevance: rel,
            baseline: baseline.per_level_stats.get(&rel).map(|s| s.avg),
            candidate: candidate.per_level_stats.get(&rel).map(|s| s.avg),
        })
        .collect();

    Comparison {
        baseline_name: baseline_name.to_string(),
        candidate_name: candidate_name.to_string(),
        assessment: Assessment::from_spearman_delta(candidate.spearman - baseline.spearman),
        metrics,
        levels,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleChange {
    pub query_id: String,
    pub query: String,
    pub product_id: String,
    pub product_title: String,
    pub relevance: u8,
    pub baseline_score: f64,
    pub candidate_score: f64,
    /// Reduction of the distance to `relevance / 3`; negative is a regression.
    pub improvement: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleChanges {
    pub improved: Vec<ExampleChange>,
    pub regressed: Vec<ExampleChange>,
}

/// The `n` pairs that moved most towards their ideal score and up to `n`
/// that moved away from it. Pairs without both scores are ignored.
pub fn example_changes(
    pairs: &[JudgedPair],
    baseline_scores: &[Option<f64>],
    candidate_scores: &[Option<f64>],
    n: usize,
) -> ExampleChanges {
    let mut changes: Vec<ExampleChange> = pairs
        .iter()
        .zip(baseline_scores.iter().zip(candidate_scores))
        .filter_map(|(pair, (b, c))| {
            let (b, c) = ((*b)?, (*c)?);
            let ideal = pair.relevance as f64 / MAX_RELEVANCE as f64;
            Some(ExampleChange {
                query_id: pair.query_id.clone(),
                query: pair.query_text.clone(),
                product_id: pair.product_id.clone(),
                product_title: pair.product_title.clone(),
                relevance: pair.relevance,
                baseline_score: b,
                candidate_score: c,
                improvement: (b - ideal).abs() - (c - ideal).abs(),
            })
        })
        .collect();

    changes.sort_by(|a, b| b.improvement.total_cmp(&a.improvement));
    let improved: Vec<ExampleChange> = changes.iter().take(n).cloned().collect();
    let regressed: Vec<ExampleChange> = changes
        .iter()
        .rev()
        .take(n)
        .filter(|c| c.improvement < 0.0)
        .cloned()
        .collect();

    ExampleChanges { improved, regressed }
}

fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "n/a".to_string()
    } else {
        format!("{v:.4}")
    }
}

fn metric_label(metric: &str, ndcg_k: usize) -> String {
    match metric {
        "spearman" => "Spearman Correlation".to_string(),
        "pearson" => "Pearson Correlation".to_string(),
        "separation" => "Relevance Separation".to_string(),
        "ndcg" => format!("NDCG@{ndcg_k}"),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}

/// Per-level table of one evaluation, as printed after each model run.
pub fn render_evaluation(name: &str, result: &EvaluationResult, ndcg_k: usize) -> String {
    let mut out = String::new();
    let rule = "=".repeat(80);
    let _ = writeln!(out, "{rule}\nEVALUATION: {name}\n{rule}");
    let _ = writeln!(
        out,
        "{:<12} {:<12} {:<12} {:<10}",
        "Relevance", "Avg Score", "Std Dev", "Count"
    );
    let _ = writeln!(out, "{}", "-".repeat(50));
    for (rel, stats) in &result.per_level_stats {
        let _ = writeln!(
            out,
            "{:<12} {:<12.4} {:<12.4} {:<10}",
            rel, stats.avg, stats.stddev, stats.count
        );
    }
    let _ = writeln!(out);
    for (label, value) in [
        ("Spearman Correlation", result.spearman),
        ("Pearson Correlation", result.pearson),
        ("Relevance Separation", result.separation),
    ] {
        let _ = writeln!(out, "  {label:<22} {}", fmt_value(value));
    }
    let _ = writeln!(out, "  {:<22} {}", format!("NDCG@{ndcg_k}"), fmt_value(result.ndcg));
    out
}

pub fn render_comparison(cmp: &Comparison, ndcg_k: usize) -> String {
    let mut out = String::new();
    let rule = "=".repeat(80);

    let _ = writeln!(out, "{rule}\nIMPROVEMENT FROM FINE-TUNING\n{rule}");
    let _ = writeln!(out, "Baseline:  {}", cmp.baseline_name);
    let _ = writeln!(out, "Candidate: {}", cmp.candidate_name);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<25} {:<12} {:<12} {:<15}",
        "Metric", "Baseline", "Fine-tuned", "Improvement"
    );
    let _ = writeln!(out, "{}", "-".repeat(70));
    for m in &cmp.metrics {
        let change = if m.delta.is_nan() {
            "n/a".to_string()
        } else {
            format!("{:+.4} ({:+.1}%)", m.delta, m.percent)
        };
        let _ = writeln!(
            out,
            "{:<25} {:<12} {:<12} {}",
            metric_label(&m.metric, ndcg_k),
            fmt_value(m.baseline),
            fmt_value(m.candidate),
            change
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{:<12} {:<12} {:<12} {:<12}",
        "Relevance", "Baseline", "Fine-tuned", "Change"
    );
    let _ = writeln!(out, "{}", "-".repeat(50));
    for level in &cmp.levels {
        let show = |v: Option<f64>| v.map(fmt_value).unwrap_or_else(|| "-".to_string());
        let change = level
            .change()
            .map(|c| format!("{c:+.4}"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:<12} {:<12} {:<12} {}",
            level.relevance,
            show(level.baseline),
            show(level.candidate),
            change
        );
    }

    let _ = writeln!(out, "\n{rule}\nASSESSMENT: {}\n{rule}", cmp.assessment);
    let _ = writeln!(out, "{}", cmp.assessment.message());
    out
}

pub fn render_examples(changes: &ExampleChanges) -> String {
    let mut out = String::new();

    let mut section = |title: &str, items: &[ExampleChange], label: &str| {
        if items.is_empty() {
            return;
        }
        let _ = writeln!(out, "\n{title}");
        for (i, c) in items.iter().enumerate() {
            let _ = writeln!(out, "\n{}. Relevance: {}/{}", i + 1, c.relevance, MAX_RELEVANCE);
            let _ = writeln!(out, "   Query: \"{}\"", c.query);
            let product = if c.product_title.is_empty() {
                "N/A"
            } else {
                c.product_title.as_str()
            };
            let _ = writeln!(out, "   Product: {}", truncate(product, 80));
            let _ = writeln!(out, "   Baseline Score:   {:.4}", c.baseline_score);
            let _ = writeln!(out, "   Fine-tuned Score: {:.4}", c.candidate_score);
            let _ = writeln!(out, "   {label}: {:+.4}", c.improvement);
        }
    };

    section(
        &format!("Top {} Most Improved Examples:", changes.improved.len()),
        &changes.improved,
        "Improvement",
    );
    section(
        &format!("Top {} Regressed Examples:", changes.regressed.len()),
        &changes.regressed,
        "Regression",
    );
    out
}
