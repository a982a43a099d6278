use crate::encoder::Encoder;
use crate::error::Result;
use crate::model::Embedding;

pub const DEFAULT_DIM: usize = 1000;
pub const MIN_DIM: usize = 8;
const MIN_NGRAM: usize = 3;
const MAX_NGRAM: usize = 5;

/// Character n-gram hashing encoder (n = 3..=5), L2 normalised.
#[derive(Debug, Clone)]
pub struct HashedEncoder {
    dim: usize,
}

impl HashedEncoder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(MIN_DIM),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn bucket(&self, ngram: &[char]) -> usize {
        let mut h: u64 = 1469598103934665603;
        let mut buf = [0u8; 4];
        for c in ngram {
            for b in c.encode_utf8(&mut buf).as_bytes() {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
        }
        (h % self.dim as u64) as usize
    }
}

impl Default for HashedEncoder {
    fn default() -> Self {
        Self { dim: DEFAULT_DIM }
    }
}

impl Encoder for HashedEncoder {
    fn embed_one(&self, text: &str) -> Result<Embedding> {
        let mut v = vec![0.0f32; self.dim];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        for n in MIN_NGRAM..=MAX_NGRAM {
            if chars.len() < n {
                continue;
            }
            for window in chars.windows(n) {
                v[self.bucket(window)] += 1.0;
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }

        Ok(v)
    }

    fn name(&self) -> String {
        format!("hashed:{}", self.dim)
    }
}
