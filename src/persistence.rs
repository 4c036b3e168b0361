//! Durable storage seam for turns
//!
//! Storage is owned by the embedding application. The engine only appends
//! and truncates, and never lets a storage failure block a generation.

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::conversation::Role;
use crate::metrics::METRICS;

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Write rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Append a turn, returning the stored id
    async fn append_turn(
        &self,
        conversation_id: &str,
        role: Role,
        text: &str,
    ) -> Result<String, PersistenceError>;

    /// Keep only the first `keep` stored turns of a conversation
    async fn truncate(&self, _conversation_id: &str, _keep: usize) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Append a turn and log instead of failing
pub async fn append_logged(
    persistence: &dyn Persistence,
    conversation_id: &str,
    role: Role,
    text: &str,
) -> Option<String> {
    match persistence.append_turn(conversation_id, role, text).await {
        Ok(id) => Some(id),
        Err(e) => {
            METRICS.record_persistence_failure();
            warn!(conversation_id, role = role.as_str(), "Failed to persist turn: {}", e);
            None
        }
    }
}

/// Truncate stored history and log instead of failing
pub async fn truncate_logged(persistence: &dyn Persistence, conversation_id: &str, keep: usize) {
    if let Err(e) = persistence.truncate(conversation_id, keep).await {
        METRICS.record_persistence_failure();
        warn!(conversation_id, keep, "Failed to truncate stored turns: {}", e);
    }
}
