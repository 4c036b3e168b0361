//! Crate-level error type

use thiserror::Error;

use crate::context::summarizer::SummarizerError;
use crate::context::token_budget::BudgetError;
use crate::media::dispatch::DispatchError;
use crate::persistence::PersistenceError;
use crate::session::transport::TransportError;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors surfaced by the chat engine
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Conversation {0} already has an active generation")]
    SessionActive(String),

    #[error("Turn not found: {0}")]
    TurnNotFound(String),

    #[error("Invalid rewind target: {0}")]
    InvalidRewindTarget(String),

    #[error("Nothing to retry")]
    NothingToRetry,

    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Summarizer(#[from] SummarizerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Internal error: {0}")]
    Internal(String),
}
