use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::encoder::EncoderSpec;
use crate::runner::RankerSpec;

#[derive(Parser, Debug)]
#[command(
    name = "relevance-eval",
    version,
    about = "Score, rank and evaluate query/product relevance"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub output: String,

    /// Timeout for calls to external services; overrides the config file.
    #[arg(long, global = true)]
    pub timeout: Option<humantime::Duration>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    #[arg(long, default_value = "data/queries.json")]
    pub queries: PathBuf,

    #[arg(long, default_value = "data/products.json")]
    pub products: PathBuf,

    #[arg(long, default_value = "data/labels.json")]
    pub labels: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate one encoder against labeled pairs.
    Evaluate {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value = "hashed")]
        encoder: EncoderSpec,

        /// Use every labeled pair instead of the held-out test split.
        #[arg(long)]
        all: bool,

        #[arg(long)]
        ndcg_k: Option<usize>,
    },

    /// Evaluate two encoders on the same pairs and report the deltas.
    Compare {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long)]
        baseline: EncoderSpec,

        #[arg(long)]
        candidate: EncoderSpec,

        #[arg(long)]
        all: bool,

        #[arg(long)]
        examples: Option<usize>,
    },

    /// Write relevance predictions for unlabeled queries.
    Predict {
        #[arg(long)]
        queries: PathBuf,

        #[arg(long)]
        products: PathBuf,

        #[arg(long, default_value = "hashed")]
        encoder: EncoderSpec,

        #[arg(long, default_value = "predictions.json")]
        out: PathBuf,

        #[arg(long)]
        products_per_query: Option<usize>,
    },

    /// Convert predictions into a ranked submission file.
    Submit {
        #[arg(long)]
        predictions: PathBuf,

        #[arg(long, default_value = "submission.json")]
        out: PathBuf,

        #[arg(long)]
        min_per_query: Option<usize>,
    },

    /// Evaluate a ranking service end to end.
    ServiceEval {
        #[command(flatten)]
        data: DataArgs,

        #[arg(long, default_value = "backend")]
        ranker: RankerSpec,

        /// Second service to evaluate and compare against `--ranker`.
        #[arg(long)]
        candidate_ranker: Option<RankerSpec>,

        #[arg(long)]
        rerank_url: Option<String>,

        /// Rerank with embedding similarity from this encoder instead of a
        /// rerank service.
        #[arg(long, conflicts_with = "rerank_url")]
        rerank_encoder: Option<EncoderSpec>,

        #[arg(long)]
        max_queries: Option<usize>,

        #[arg(long)]
        sequential: bool,

        #[arg(long)]
        all: bool,
    },

    /// Search the catalog for free text.
    Search {
        #[arg(long, default_value = "data/products.json")]
        products: PathBuf,

        #[arg(long)]
        query: String,

        #[arg(long, default_value = "hashed")]
        encoder: EncoderSpec,

        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Product fields shown with each hit.
        #[arg(long, value_delimiter = ',', default_values = ["title", "brand", "category_path"])]
        fields: Vec<String>,
    },

    /// Ask a ranking service about every query and save its answers as
    /// ranked rows.
    Respond {
        #[arg(long, default_value = "data/queries.json")]
        queries: PathBuf,

        /// Catalog for `encoder:`/`hybrid:` rankers and rerank texts.
        #[arg(long)]
        products: Option<PathBuf>,

        #[arg(long, default_value = "backend")]
        ranker: RankerSpec,

        #[arg(long)]
        rerank_url: Option<String>,

        #[arg(long, conflicts_with = "rerank_url")]
        rerank_encoder: Option<EncoderSpec>,

        #[arg(long, default_value = "responses.json")]
        out: PathBuf,

        #[arg(long, default_value_t = 0)]
        min_per_query: usize,

        #[arg(long)]
        sequential: bool,
    },

    /// Export embeddings as a `fixture:` table.
    Embed {
        #[arg(long)]
        queries: Option<PathBuf>,

        #[arg(long)]
        products: Option<PathBuf>,

        /// Extra text to embed; repeatable.
        #[arg(long = "text")]
        texts: Vec<String>,

        #[arg(long, default_value = "dense")]
        encoder: EncoderSpec,

        #[arg(long, default_value = "embeddings.json")]
        out: PathBuf,
    },

    /// Show which model an encoder selector resolves to.
    ModelInfo {
        #[arg(long, default_value = "dense")]
        encoder: EncoderSpec,
    },
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.output.as_str(), "text" | "json") {
            return Err(format!("Unknown output format: {}", self.output));
        }

        if let Some(timeout) = &self.timeout {
            if timeout.as_ref().is_zero() {
                return Err("timeout must be > 0".to_string());
            }
        }

        match &self.command {
            Command::Evaluate {
                ndcg_k: Some(0), ..
            } => Err("ndcg-k must be > 0".to_string()),
            Command::Predict {
                products_per_query: Some(0),
                ..
            } => Err("products-per-query must be > 0".to_string()),
            Command::ServiceEval {
                max_queries: Some(0),
                ..
            } => Err("max-queries must be > 0".to_string()),
            Command::Search { top_k: 0, .. } => Err("top-k must be > 0".to_string()),
            Command::Embed {
                queries: None,
                products: None,
                texts,
                ..
            } if texts.is_empty() => {
                Err("embed needs --queries, --products or --text".to_string())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["relevance-eval", "evaluate"]).expect("parse");
        assert_eq!(cli.output, "text");
        assert!(cli.config.is_none());
        match cli.command {
            Command::Evaluate {
                data,
                encoder,
                all,
                ndcg_k,
            } => {
                assert_eq!(data.labels, PathBuf::from("data/labels.json"));
                assert_eq!(encoder.to_string(), "hashed:1000");
                assert!(!all);
                assert_eq!(ndcg_k, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "relevance-eval",
            "service-eval",
            "--ranker",
            "backend:http://localhost:8080#test_finetuned",
            "--output",
            "json",
            "--timeout",
            "5s",
        ])
        .expect("parse");
        assert_eq!(cli.output, "json");
        assert_eq!(
            *cli.timeout.unwrap().as_ref(),
            std::time::Duration::from_secs(5)
        );
        assert!(matches!(
            cli.command,
            Command::ServiceEval {
                ranker: RankerSpec::Backend { .. },
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_encoder() {
        let parsed = Cli::try_parse_from(["relevance-eval", "evaluate", "--encoder", "minilm"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn parses_search_fields() {
        let cli = Cli::try_parse_from([
            "relevance-eval",
            "search",
            "--query",
            "organic soup",
            "--fields",
            "title,ingredients",
        ])
        .unwrap();
        match cli.command {
            Command::Search {
                query,
                top_k,
                fields,
                ..
            } => {
                assert_eq!(query, "organic soup");
                assert_eq!(top_k, 10);
                assert_eq!(fields, vec!["title", "ingredients"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rerank_url_and_encoder_conflict() {
        let parsed = Cli::try_parse_from([
            "relevance-eval",
            "service-eval",
            "--rerank-url",
            "http://localhost:8002/rerank",
            "--rerank-encoder",
            "hashed",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn embed_needs_a_source() {
        let cli = Cli::try_parse_from(["relevance-eval", "embed"]).unwrap();
        assert!(cli.validate().is_err());

        let cli =
            Cli::try_parse_from(["relevance-eval", "embed", "--text", "soup", "--text", "cake"])
                .unwrap();
        assert!(cli.validate().is_ok());
        assert!(matches!(cli.command, Command::Embed { ref texts, .. } if texts.len() == 2));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let cli = Cli::try_parse_from(["relevance-eval", "evaluate", "--ndcg-k", "0"]).unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from([
            "relevance-eval",
            "--timeout",
            "0s",
            "submit",
            "--predictions",
            "p.json",
        ])
        .unwrap();
        assert!(cli.validate().is_err());

        let cli = Cli::try_parse_from(["relevance-eval", "--output", "yaml", "evaluate"]).unwrap();
        assert!(cli.validate().is_err());
    }
}
