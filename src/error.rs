use std::io;

use thiserror::Error;

use crate::submission::SubmissionProblem;

#[derive(Error, Debug)]
pub enum RelevanceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("No embedding known for text {0:?}")]
    UnknownEmbedding(String),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Malformed rank sequence: {} problem(s), first: {}", .0.len(), first_problem(.0))]
    MalformedRankSequence(Vec<SubmissionProblem>),
}

fn first_problem(problems: &[SubmissionProblem]) -> String {
    problems
        .first()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl RelevanceError {
    /// Errors a batch loop may skip over instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelevanceError::ServiceUnavailable(_) | RelevanceError::UnknownEmbedding(_)
        )
    }
}

impl From<reqwest::Error> for RelevanceError {
    fn from(err: reqwest::Error) -> Self {
        RelevanceError::ServiceUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelevanceError>;
