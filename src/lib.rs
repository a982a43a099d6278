pub mod cli;
pub mod config;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod evaluate;
pub mod fusion;
pub mod metrics;
pub mod model;
pub mod output;
pub mod predict;
pub mod ranking;
pub mod relevance;
pub mod report;
pub mod runner;
pub mod scoring;
pub mod search;
pub mod service;
pub mod service_eval;
pub mod submission;

pub use encoder::{Encoder, EncoderSpec};
pub use error::{RelevanceError, Result};
pub use evaluate::{EvaluationResult, evaluate, evaluate_at};
pub use model::{Embedding, Product, Query, RankedEntry, RelevanceLabel, ScoredCandidate};
pub use ranking::rank;
pub use relevance::score_to_relevance;
pub use scoring::similarity;
