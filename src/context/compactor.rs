//! Context compactor
//!
//! Fits an ordered history into a token budget:
//! - Keeps the longest suffix that fits, walking back from the newest turn
//! - Summarizes the dropped prefix into a leading system entry
//! - Reuses the synopsis while the dropped prefix keeps the same length
//!
//! The newest turn is always kept, even when it alone exceeds the budget.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as SlotMutex, PoisonError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::{usage_percent, CompactedContext, CompactionCache, ContextTurn};
use super::summarizer::Summarizer;
use super::token_estimator::{EstimatorKind, TokenEstimator};
use crate::metrics::METRICS;

/// Compaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    #[serde(default)]
    pub estimator: EstimatorKind,
    #[serde(default = "default_tokens_per_word")]
    pub tokens_per_word: f64,
    /// Role/framing tokens charged per turn on top of its text
    #[serde(default = "default_per_turn_overhead")]
    pub per_turn_overhead: usize,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
    #[serde(default = "default_synopsis_prefix")]
    pub synopsis_prefix: String,
}

fn default_tokens_per_word() -> f64 { 1.3 }
fn default_per_turn_overhead() -> usize { 4 }
fn default_summary_max_tokens() -> usize { 600 }
fn default_synopsis_prefix() -> String { "Summary of the earlier conversation:\n".to_string() }

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorKind::default(),
            tokens_per_word: default_tokens_per_word(),
            per_turn_overhead: default_per_turn_overhead(),
            summary_max_tokens: default_summary_max_tokens(),
            synopsis_prefix: default_synopsis_prefix(),
        }
    }
}

/// Budget-fitting compactor with a single-slot synopsis cache
///
/// `reset` swaps in a fresh slot instead of clearing the current one, so it
/// never waits on a pass that is still summarizing. That pass finishes
/// against the orphaned slot.
pub struct ContextCompactor {
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Arc<dyn Summarizer>,
    config: CompactionConfig,
    cache: SlotMutex<Arc<Mutex<CompactionCache>>>,
}

impl ContextCompactor {
    pub fn new(
        estimator: Arc<dyn TokenEstimator>,
        summarizer: Arc<dyn Summarizer>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            estimator,
            summarizer,
            config,
            cache: SlotMutex::new(Arc::default()),
        }
    }

    /// Build with the estimator named in the configuration
    pub fn from_config(summarizer: Arc<dyn Summarizer>, config: CompactionConfig) -> Self {
        let estimator = config.estimator.build(config.tokens_per_word);
        Self::new(estimator, summarizer, config)
    }

    /// Fit `turns` into `budget`, summarizing whatever does not fit
    pub async fn compact_and_fit(&self, turns: &[ContextTurn], budget: usize) -> CompactedContext {
        if turns.is_empty() {
            return CompactedContext::empty(budget);
        }

        // Held for the whole pass so a cache miss costs exactly one summarization
        let slot = self.slot();
        let mut cache = slot.lock().await;

        let (dropped, retained_tokens) = self.fit_suffix(turns, budget);
        let retained = &turns[dropped..];

        if dropped == 0 {
            if cache.summarized_count != 0 {
                debug!("History fits again, invalidating synopsis cache");
                cache.clear();
            }
            let usage = usage_percent(retained_tokens, budget);
            METRICS.record_compaction(false, usage);
            return CompactedContext {
                turns: retained.to_vec(),
                dropped: 0,
                synopsis: None,
                used_tokens: retained_tokens,
                budget,
                usage_percent: usage,
            };
        }

        let synopsis = match cache.lookup(dropped) {
            Some(hit) => {
                debug!(dropped, "Reusing cached synopsis");
                METRICS.record_summarization("cache_hit");
                Some(hit.to_string())
            }
            None => {
                cache.clear();
                self.summarize_prefix(&turns[..dropped], &mut cache).await
            }
        };
        drop(cache);

        let mut compacted = Vec::with_capacity(retained.len() + 1);
        let mut used_tokens = retained_tokens;
        if let Some(synopsis) = &synopsis {
            let entry = ContextTurn::system(format!("{}{}", self.config.synopsis_prefix, synopsis));
            used_tokens += self.turn_cost(&entry);
            compacted.push(entry);
        }
        compacted.extend_from_slice(retained);

        let usage = usage_percent(used_tokens, budget);
        METRICS.record_compaction(true, usage);
        info!(
            dropped,
            retained = retained.len(),
            used_tokens,
            budget,
            "Compacted conversation history"
        );

        CompactedContext {
            turns: compacted,
            dropped,
            synopsis,
            used_tokens,
            budget,
            usage_percent: usage,
        }
    }

    /// Forget the cached synopsis, e.g. when another conversation is opened
    pub fn reset(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Arc::default();
    }

    /// Snapshot of the cache slot
    pub async fn cache_state(&self) -> CompactionCache {
        self.slot().lock().await.clone()
    }

    fn slot(&self) -> Arc<Mutex<CompactionCache>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn turn_cost(&self, turn: &ContextTurn) -> usize {
        self.estimator.estimate(&turn.text) + self.config.per_turn_overhead
    }

    /// Index of the first retained turn and the retained token total
    fn fit_suffix(&self, turns: &[ContextTurn], budget: usize) -> (usize, usize) {
        let mut start = turns.len();
        let mut used = 0usize;

        for (index, turn) in turns.iter().enumerate().rev() {
            let cost = self.turn_cost(turn);
            let keeps_something = start < turns.len();
            if keeps_something && used + cost > budget {
                break;
            }
            used += cost;
            start = index;
            if used > budget {
                // Newest turn alone is over budget
                break;
            }
        }

        (start, used)
    }

    async fn summarize_prefix(
        &self,
        prefix: &[ContextTurn],
        cache: &mut CompactionCache,
    ) -> Option<String> {
        match self
            .summarizer
            .summarize(prefix, self.config.summary_max_tokens)
            .await
        {
            Ok(synopsis) if !synopsis.trim().is_empty() => {
                METRICS.record_summarization("success");
                cache.summarized_count = prefix.len();
                cache.synopsis = Some(synopsis.clone());
                Some(synopsis)
            }
            Ok(_) => {
                METRICS.record_summarization("error");
                warn!(dropped = prefix.len(), "Summarizer returned an empty synopsis");
                None
            }
            Err(e) => {
                METRICS.record_summarization("error");
                warn!(
                    dropped = prefix.len(),
                    "Summarization failed, continuing with truncated history: {}", e
                );
                None
            }
        }
    }
}
