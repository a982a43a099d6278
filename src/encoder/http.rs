use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encoder::Encoder;
use crate::error::{RelevanceError, Result};
use crate::model::Embedding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    Dense,
    Sparse,
}

impl EmbeddingKind {
    fn endpoint(self) -> &'static str {
        match self {
            EmbeddingKind::Dense => "dense-embed",
            EmbeddingKind::Sparse => "sparse-embed",
        }
    }
}

#[derive(Serialize)]
struct EncodingRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct EncodingResponse {
    #[serde(alias = "sparse_embedding")]
    dense_embedding: Embedding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub model_path: String,
    pub embedding_dimension: usize,
}

/// Client for an embedding service exposing `/dense-embed`, `/sparse-embed`
/// and `/model-info`.
#[derive(Debug, Clone)]
pub struct HttpEncoder {
    client: Client,
    base_url: String,
    kind: EmbeddingKind,
}

impl HttpEncoder {
    pub fn new(base_url: &str, kind: EmbeddingKind, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            kind,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Asks the service which model it serves.
    pub fn model_info(&self) -> Result<ModelInfo> {
        let url = self.url("model-info");
        debug!(%url, "requesting model info");
        let info = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RelevanceError::ServiceUnavailable(format!("{url}: {e}")))?
            .error_for_status()
            .map_err(|e| RelevanceError::ServiceUnavailable(format!("{url}: {e}")))?
            .json()
            .map_err(|e| RelevanceError::ServiceUnavailable(format!("{url}: {e}")))?;
        Ok(info)
    }
}

impl Encoder for HttpEncoder {
    fn embed_one(&self, text: &str) -> Result<Embedding> {
        let url = self.url(self.kind.endpoint());
        debug!(%url, chars = text.len(), "requesting embedding");

        let response: EncodingResponse = self
            .client
            .post(&url)
            .json(&EncodingRequest { query: text })
            .send()
            .map_err(|e| RelevanceError::ServiceUnavailable(format!("{url}: {e}")))?
            .error_for_status()
            .map_err(|e| RelevanceError::ServiceUnavailable(format!("{url}: {e}")))?
            .json()?;

        Ok(response.dense_embedding)
    }

    fn name(&self) -> String {
        match self.kind {
            EmbeddingKind::Dense => self.base_url.clone(),
            EmbeddingKind::Sparse => format!("sparse+{}", self.base_url),
        }
    }
}
