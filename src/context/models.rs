//! Data models for context compaction

use serde::{Deserialize, Serialize};

use crate::conversation::Role;

/// Role + text pair fed to the compactor and the generation transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTurn {
    pub role: Role,
    pub text: String,
}

impl ContextTurn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }
}

/// Single-slot cache of the last synopsis
///
/// Keyed by the number of leading turns that were summarized; any pass that
/// drops a different number of turns replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionCache {
    pub summarized_count: usize,
    pub synopsis: Option<String>,
}

impl CompactionCache {
    /// Cached synopsis for a prefix of `dropped` turns, if any
    pub fn lookup(&self, dropped: usize) -> Option<&str> {
        if self.summarized_count == dropped {
            self.synopsis.as_deref()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.summarized_count = 0;
        self.synopsis = None;
    }
}

/// Result of fitting a history into a token budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactedContext {
    /// Synopsis entry (if any) followed by the retained suffix
    pub turns: Vec<ContextTurn>,
    /// Number of leading turns that did not fit
    pub dropped: usize,
    pub synopsis: Option<String>,
    /// Estimated tokens of everything in `turns`
    pub used_tokens: usize,
    pub budget: usize,
    /// Share of the budget in use, within [0, 100]
    pub usage_percent: f32,
}

impl CompactedContext {
    pub fn empty(budget: usize) -> Self {
        Self {
            turns: Vec::new(),
            dropped: 0,
            synopsis: None,
            used_tokens: 0,
            budget,
            usage_percent: 0.0,
        }
    }

    pub fn is_compacted(&self) -> bool {
        self.dropped > 0
    }
}

/// Usage of `budget` by `used` tokens as a percentage clamped to [0, 100]
pub fn usage_percent(used: usize, budget: usize) -> f32 {
    if budget == 0 {
        return if used == 0 { 0.0 } else { 100.0 };
    }
    ((used as f64 / budget as f64) * 100.0).clamp(0.0, 100.0) as f32
}
