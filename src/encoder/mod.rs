use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelevanceError, Result};
use crate::model::Embedding;

pub mod fixture;
pub mod hashed;
pub mod http;

pub use fixture::FixtureEncoder;
pub use hashed::HashedEncoder;
pub use http::{EmbeddingKind, HttpEncoder, ModelInfo};

/// Turns text into vectors. Implementations must return the same vector for
/// the same text and accept the empty string.
pub trait Encoder {
    fn embed_one(&self, text: &str) -> Result<Embedding>;

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn name(&self) -> String;
}

impl Encoder for Box<dyn Encoder> {
    fn embed_one(&self, text: &str) -> Result<Embedding> {
        (**self).embed_one(text)
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        (**self).embed_many(texts)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

impl Encoder for Box<dyn Encoder + Send + Sync> {
    fn embed_one(&self, text: &str) -> Result<Embedding> {
        (**self).embed_one(text)
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        (**self).embed_many(texts)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

impl<E: Encoder + ?Sized> Encoder for &E {
    fn embed_one(&self, text: &str) -> Result<Embedding> {
        (**self).embed_one(text)
    }

    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        (**self).embed_many(texts)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Textual encoder selector: `hashed`, `hashed:<dim>`, `fixture:<path>`,
/// `http(s)://base` for the dense endpoint, `sparse+http(s)://base` for the
/// sparse one. `dense` and `sparse` use the configured embedding service.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderSpec {
    Hashed { dim: usize },
    Fixture { path: PathBuf },
    Http { base_url: String, kind: EmbeddingKind },
    Service { kind: EmbeddingKind },
}

impl FromStr for EncoderSpec {
    type Err = RelevanceError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "dense" => {
                return Ok(EncoderSpec::Service {
                    kind: EmbeddingKind::Dense,
                });
            }
            "sparse" => {
                return Ok(EncoderSpec::Service {
                    kind: EmbeddingKind::Sparse,
                });
            }
            _ => {}
        }
        if s == "hashed" {
            return Ok(EncoderSpec::Hashed {
                dim: hashed::DEFAULT_DIM,
            });
        }
        if let Some(dim) = s.strip_prefix("hashed:") {
            let dim: usize = dim
                .parse()
                .map_err(|_| RelevanceError::InvalidArg(format!("bad hashed dimension: {dim}")))?;
            if dim < hashed::MIN_DIM {
                return Err(RelevanceError::InvalidArg(format!(
                    "hashed dimension must be at least {}, got {dim}",
                    hashed::MIN_DIM
                )));
            }
            return Ok(EncoderSpec::Hashed { dim });
        }
        if let Some(path) = s.strip_prefix("fixture:") {
            return Ok(EncoderSpec::Fixture {
                path: PathBuf::from(path),
            });
        }
        if let Some(url) = s.strip_prefix("sparse+") {
            if url.starts_with("http://") || url.starts_with("https://") {
                return Ok(EncoderSpec::Http {
                    base_url: url.to_string(),
                    kind: EmbeddingKind::Sparse,
                });
            }
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(EncoderSpec::Http {
                base_url: s.to_string(),
                kind: EmbeddingKind::Dense,
            });
        }
        Err(RelevanceError::InvalidArg(format!(
            "unknown encoder '{s}' (expected hashed, hashed:<dim>, fixture:<path>, dense, sparse or an http(s) URL)"
        )))
    }
}

impl fmt::Display for EncoderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderSpec::Hashed { dim } => write!(f, "hashed:{dim}"),
            EncoderSpec::Fixture { path } => write!(f, "fixture:{}", path.display()),
            EncoderSpec::Http {
                base_url,
                kind: EmbeddingKind::Dense,
            } => write!(f, "{base_url}"),
            EncoderSpec::Http {
                base_url,
                kind: EmbeddingKind::Sparse,
            } => write!(f, "sparse+{base_url}"),
            EncoderSpec::Service {
                kind: EmbeddingKind::Dense,
            } => write!(f, "dense"),
            EncoderSpec::Service {
                kind: EmbeddingKind::Sparse,
            } => write!(f, "sparse"),
        }
    }
}

impl EncoderSpec {
    /// Builds the long-lived encoder handle for this selector; `embed_url`
    /// backs the `dense` and `sparse` selectors.
    pub fn build(
        &self,
        embed_url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn Encoder + Send + Sync>> {
        let encoder: Box<dyn Encoder + Send + Sync> = match self {
            EncoderSpec::Hashed { dim } => Box::new(HashedEncoder::new(*dim)),
            EncoderSpec::Fixture { path } => Box::new(FixtureEncoder::load(path)?),
            EncoderSpec::Http { base_url, kind } => {
                Box::new(HttpEncoder::new(base_url, *kind, timeout)?)
            }
            EncoderSpec::Service { kind } => {
                Box::new(HttpEncoder::new(embed_url, *kind, timeout)?)
            }
        };
        Ok(encoder)
    }

    /// Describes the model behind this selector. HTTP selectors ask the
    /// embedding service; local encoders describe themselves.
    pub fn model_info(&self, embed_url: &str, timeout: Duration) -> Result<ModelInfo> {
        match self {
            EncoderSpec::Http { base_url, kind } => {
                HttpEncoder::new(base_url, *kind, timeout)?.model_info()
            }
            EncoderSpec::Service { kind } => HttpEncoder::new(embed_url, *kind, timeout)?.model_info(),
            EncoderSpec::Hashed { dim } => Ok(ModelInfo {
                model_name: self.to_string(),
                model_path: String::new(),
                embedding_dimension: HashedEncoder::new(*dim).dim(),
            }),
            EncoderSpec::Fixture { path } => {
                let fixture = FixtureEncoder::load(path)?;
                Ok(ModelInfo {
                    model_name: fixture.name(),
                    model_path: path.display().to_string(),
                    embedding_dimension: fixture.dim(),
                })
            }
        }
    }
}
