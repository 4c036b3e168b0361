//! Context management with token budget enforcement
//!
//! Fits a conversation's history into the selected model's context window,
//! replacing the overflowing prefix with a synopsis.

pub mod compactor;
pub mod models;
pub mod summarizer;
pub mod token_budget;
pub mod token_estimator;

pub use compactor::{CompactionConfig, ContextCompactor};
pub use models::{CompactedContext, CompactionCache, ContextTurn};
pub use summarizer::{ConcatenationSummarizer, LLMSummarizer, Summarizer, SummarizerConfig};
pub use token_budget::{BudgetError, TokenBudgetConfig, TokenBudgetPolicy};
pub use token_estimator::{EstimatorKind, TiktokenEstimator, TokenEstimator, WordBasedEstimator};
