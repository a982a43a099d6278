use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::encoder::Encoder;
use crate::error::{RelevanceError, Result};
use crate::model::Embedding;

/// Precomputed `text -> vector` table, e.g. embeddings exported from a model
/// run elsewhere. Unknown text is an error.
#[derive(Debug, Clone, Default)]
pub struct FixtureEncoder {
    name: String,
    dim: usize,
    vectors: HashMap<String, Embedding>,
}

impl FixtureEncoder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dim: 0,
            vectors: HashMap::new(),
        }
    }

    pub fn insert(&mut self, text: impl Into<String>, vector: Embedding) -> Result<()> {
        if self.vectors.is_empty() {
            self.dim = vector.len();
        } else if vector.len() != self.dim {
            return Err(RelevanceError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        self.vectors.insert(text.into(), vector);
        Ok(())
    }

    pub fn with(mut self, text: impl Into<String>, vector: Embedding) -> Result<Self> {
        self.insert(text, vector)?;
        Ok(self)
    }

    /// Loads a JSON object mapping text to vector.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table: HashMap<String, Embedding> = serde_json::from_reader(BufReader::new(file))?;

        let mut encoder = Self::new(format!("fixture:{}", path.display()));
        for (text, vector) in table {
            encoder.insert(text, vector)?;
        }
        info!(
            entries = encoder.len(),
            dim = encoder.dim,
            path = %path.display(),
            "loaded embedding fixture"
        );
        Ok(encoder)
    }

    /// Writes the table in the layout `load` reads, sorted by text.
    pub fn save(&self, path: &Path) -> Result<()> {
        let sorted: BTreeMap<&str, &Embedding> =
            self.vectors.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &sorted)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        info!(entries = self.len(), path = %path.display(), "saved embedding fixture");
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl Encoder for FixtureEncoder {
    fn embed_one(&self, text: &str) -> Result<Embedding> {
        if let Some(v) = self.vectors.get(text) {
            return Ok(v.clone());
        }
        if text.is_empty() {
            return Ok(vec![0.0; self.dim]);
        }
        Err(RelevanceError::UnknownEmbedding(text.to_string()))
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}
