use serde::{Deserialize, Serialize};

use crate::error::{RelevanceError, Result};

pub const MAX_RELEVANCE: u8 = 3;

/// Lower bounds of the relevance bands 3, 2 and 1. Anything below `low` is 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceThresholds {
    pub high: f32,
    pub medium: f32,
    pub low: f32,
}

impl Default for RelevanceThresholds {
    fn default() -> Self {
        Self {
            high: 0.7,
            medium: 0.5,
            low: 0.3,
        }
    }
}

impl RelevanceThresholds {
    pub fn validate(&self) -> Result<()> {
        let finite = self.high.is_finite() && self.medium.is_finite() && self.low.is_finite();
        if !finite || self.low > self.medium || self.medium > self.high {
            return Err(RelevanceError::InvalidConfig(format!(
                "relevance thresholds must satisfy low <= medium <= high, got {self:?}"
            )));
        }
        Ok(())
    }

    /// NaN maps to 0.
    pub fn map(&self, score: f32) -> u8 {
        if score >= self.high {
            3
        } else if score >= self.medium {
            2
        } else if score >= self.low {
            1
        } else {
            0
        }
    }
}

pub fn score_to_relevance(score: f32) -> u8 {
    RelevanceThresholds::default().map(score)
}
