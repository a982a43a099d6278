use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RelevanceError, Result};
use crate::relevance::RelevanceThresholds;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relevance: RelevanceThresholds,
    pub evaluation: EvaluationConfig,
    pub predict: PredictConfig,
    pub submission: SubmissionConfig,
    pub service: ServiceConfig,
    pub fusion: FusionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub ndcg_k: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
    pub batch_size: usize,
    pub examples: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            ndcg_k: crate::evaluate::DEFAULT_NDCG_K,
            test_fraction: 0.1,
            split_seed: 42,
            batch_size: 32,
            examples: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    pub products_per_query: usize,
}

impl Default for PredictConfig {
    fn default() -> Self {
        Self {
            products_per_query: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    pub min_products_per_query: usize,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            min_products_per_query: crate::submission::DEFAULT_MIN_PER_QUERY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub embed_url: String,
    pub backend_url: String,
    pub rerank_url: Option<String>,
    pub table: String,
    pub timeout_ms: u64,
    pub max_queries: usize,
    pub rerank_depth: usize,
    pub parallel: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            embed_url: "http://localhost:8001".into(),
            backend_url: "http://localhost:8080".into(),
            rerank_url: None,
            table: "test_products".into(),
            timeout_ms: 30_000,
            max_queries: 50,
            rerank_depth: 64,
            parallel: true,
        }
    }
}

impl ServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub k: f64,
    pub dense_weight: f64,
    pub sparse_weight: f64,
    pub limit: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: crate::fusion::DEFAULT_RRF_K,
            dense_weight: 0.6,
            sparse_weight: 0.2,
            limit: 64,
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Reads `path` when given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.relevance.validate()?;

        let eval = &self.evaluation;
        if !(0.0..=1.0).contains(&eval.test_fraction) {
            return Err(RelevanceError::InvalidConfig(format!(
                "evaluation.test_fraction must be within [0, 1], got {}",
                eval.test_fraction
            )));
        }
        if eval.ndcg_k == 0 {
            return Err(RelevanceError::InvalidConfig(
                "evaluation.ndcg_k must be > 0".into(),
            ));
        }
        if eval.batch_size == 0 {
            return Err(RelevanceError::InvalidConfig(
                "evaluation.batch_size must be > 0".into(),
            ));
        }
        if self.service.timeout_ms == 0 {
            return Err(RelevanceError::InvalidConfig(
                "service.timeout_ms must be > 0".into(),
            ));
        }
        if self.fusion.k < 0.0 || !self.fusion.k.is_finite() {
            return Err(RelevanceError::InvalidConfig(
                "fusion.k must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.relevance.high, 0.7);
        assert_eq!(config.evaluation.ndcg_k, 10);
        assert_eq!(config.submission.min_products_per_query, 10);
        assert_eq!(config.service.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn partial_sections_override() {
        let config = Config::from_toml(
            r#"
            [relevance]
            high = 0.8

            [service]
            table = "test_finetuned"
            rerank_url = "http://localhost:8002/rerank"
            "#,
        )
        .unwrap();

        assert_eq!(config.relevance.high, 0.8);
        assert_eq!(config.relevance.medium, 0.5);
        assert_eq!(config.service.table, "test_finetuned");
        assert_eq!(
            config.service.rerank_url.as_deref(),
            Some("http://localhost:8002/rerank")
        );
        assert_eq!(config.service.max_queries, 50);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            Config::from_toml("[relevance]\nlow = 0.9"),
            Err(RelevanceError::InvalidConfig(_))
        ));
        assert!(Config::from_toml("[evaluation]\ntest_fraction = 1.5").is_err());
        assert!(Config::from_toml("[evaluation]\nndcg_k = 0").is_err());
        assert!(matches!(
            Config::from_toml("[evaluation]\nndcg_k = \"ten\""),
            Err(RelevanceError::ConfigParse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relevance.toml");
        fs::write(&path, "[predict]\nproducts_per_query = 20\n").unwrap();

        let config = Config::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.predict.products_per_query, 20);
        assert_eq!(Config::load_or_default(None).unwrap(), Config::default());
    }
}
