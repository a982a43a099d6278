use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RelevanceError, Result};
use crate::model::ScoredCandidate;
use crate::service::{CandidateRanker, RerankCandidate, Reranker};

fn unavailable(url: &str, err: impl std::fmt::Display) -> RelevanceError {
    RelevanceError::ServiceUnavailable(format!("{url}: {err}"))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackendQuery<'a> {
    query: &'a str,
    table_name: &'a str,
}

/// Search backend answering `POST /query` with an ordered list of ids.
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    url: String,
    table: String,
}

impl BackendClient {
    pub fn new(base_url: &str, table: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/query", base_url.trim_end_matches('/')),
            table: table.to_string(),
        })
    }
}

impl CandidateRanker for BackendClient {
    fn rank_candidates(&self, query: &str) -> Result<Vec<String>> {
        debug!(url = %self.url, table = %self.table, query, "querying backend");
        let ids: Vec<String> = self
            .client
            .post(&self.url)
            .json(&BackendQuery {
                query,
                table_name: &self.table,
            })
            .send()
            .map_err(|e| unavailable(&self.url, e))?
            .error_for_status()
            .map_err(|e| unavailable(&self.url, e))?
            .json()
            .map_err(|e| unavailable(&self.url, e))?;
        Ok(ids)
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    candidates: &'a [RerankCandidate],
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Option<Vec<RerankResult>>,
}

#[derive(Deserialize)]
struct RerankResult {
    id: String,
    score: f32,
}

/// Cross-encoder service: `POST {url}` with the query and candidates,
/// answered by `{"results": [{"id", "text", "score"}]}`.
#[derive(Debug, Clone)]
pub struct RerankClient {
    client: Client,
    url: String,
}

impl RerankClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Reranker for RerankClient {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<ScoredCandidate>> {
        let response: RerankResponse = self
            .client
            .post(&self.url)
            .json(&RerankRequest { query, candidates })
            .send()
            .map_err(|e| unavailable(&self.url, e))?
            .error_for_status()
            .map_err(|e| unavailable(&self.url, e))?
            .json()
            .map_err(|e| unavailable(&self.url, e))?;

        let results = response
            .results
            .ok_or_else(|| unavailable(&self.url, "reply has no results"))?;
        Ok(results
            .into_iter()
            .map(|r| ScoredCandidate::new(r.id, r.score))
            .collect())
    }
}
