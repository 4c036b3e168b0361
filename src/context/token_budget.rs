//! Per-model context budget derivation
//!
//! A model's context window is split into:
//! - System instructions reserve
//! - Completion reserve (room for the reply)
//! - History budget (everything the compactor may fill)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::ModelInfo;

/// Token budget configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    #[serde(default = "default_reserved_system")]
    pub reserved_system_tokens: usize,
    #[serde(default = "default_reserved_completion")]
    pub reserved_completion_tokens: usize,
    /// History budget never drops below this, even on tiny models
    #[serde(default = "default_min_budget")]
    pub min_budget_tokens: usize,
}

fn default_reserved_system() -> usize { 512 }
fn default_reserved_completion() -> usize { 1024 }
fn default_min_budget() -> usize { 256 }

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self {
            reserved_system_tokens: default_reserved_system(),
            reserved_completion_tokens: default_reserved_completion(),
            min_budget_tokens: default_min_budget(),
        }
    }
}

impl TokenBudgetConfig {
    pub fn reserved(&self) -> usize {
        self.reserved_system_tokens + self.reserved_completion_tokens
    }

    /// Validate that the reservations leave room for history on a model
    pub fn validate_for(&self, model: &ModelInfo) -> Result<(), BudgetError> {
        if self.reserved() >= model.max_context_tokens {
            return Err(BudgetError::InsufficientBudget {
                model: model.id.clone(),
                reserved: self.reserved(),
                available: model.max_context_tokens,
            });
        }
        Ok(())
    }
}

/// Token budget errors
#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("Model {model} has {available} context tokens but {reserved} are reserved")]
    InsufficientBudget {
        model: String,
        reserved: usize,
        available: usize,
    },
}

/// Derives the history budget a conversation may use for a model
#[derive(Debug, Clone, Default)]
pub struct TokenBudgetPolicy {
    config: TokenBudgetConfig,
}

impl TokenBudgetPolicy {
    pub fn new(config: TokenBudgetConfig) -> Self {
        Self { config }
    }

    pub fn budget_for(&self, model: &ModelInfo) -> usize {
        model
            .max_context_tokens
            .saturating_sub(self.config.reserved())
            .max(self.config.min_budget_tokens)
    }

    pub fn config(&self) -> &TokenBudgetConfig {
        &self.config
    }
}
