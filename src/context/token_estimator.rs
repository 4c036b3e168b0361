//! Token cost of a turn's text
//!
//! The compactor only needs a consistent estimate, not the provider's exact
//! count. Word counting is the default; tiktoken is opt-in.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, CoreBPE};

use crate::error::{ChatError, Result};

pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// cl100k_base byte-pair encoding
pub struct TiktokenEstimator {
    encoding: CoreBPE,
}

impl TiktokenEstimator {
    pub fn new() -> Result<Self> {
        let encoding = cl100k_base()
            .map_err(|e| ChatError::Configuration(format!("tiktoken init failed: {}", e)))?;
        Ok(Self { encoding })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        self.encoding.encode_with_special_tokens(text).len()
    }
}

/// Whitespace-separated words times a fixed ratio, rounded up
pub struct WordBasedEstimator {
    ratio: f64,
}

impl WordBasedEstimator {
    pub fn new(tokens_per_word: f64) -> Self {
        Self {
            ratio: tokens_per_word,
        }
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }
}

impl Default for WordBasedEstimator {
    fn default() -> Self {
        Self::new(1.3)
    }
}

impl TokenEstimator for WordBasedEstimator {
    fn estimate(&self, text: &str) -> usize {
        let words = text.split_whitespace().count() as f64;
        (words * self.ratio).ceil() as usize
    }
}

/// Estimator selection in configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    #[default]
    Words,
    Tiktoken,
}

impl EstimatorKind {
    /// Build the configured estimator, falling back to words if tiktoken fails
    pub fn build(self, tokens_per_word: f64) -> Arc<dyn TokenEstimator> {
        match self {
            Self::Words => Arc::new(WordBasedEstimator::new(tokens_per_word)),
            Self::Tiktoken => match TiktokenEstimator::new() {
                Ok(estimator) => Arc::new(estimator),
                Err(e) => {
                    tracing::warn!("{}, falling back to word-based estimation", e);
                    Arc::new(WordBasedEstimator::new(tokens_per_word))
                }
            },
        }
    }
}
