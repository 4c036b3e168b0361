//! Generation transport seam
//!
//! The transport opens one text generation and yields increments until the
//! model is done. The wire format belongs to the transport implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::models::ContextTurn;
use crate::conversation::MediaLocator;

/// Transport errors
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Stream ended before the generation completed")]
    Interrupted,

    #[error("Generation aborted")]
    Aborted,
}

/// One generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub conversation_id: String,
    pub turns: Vec<ContextTurn>,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MediaLocator>,
}

/// Event emitted by a generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// Newly arrived text
    Delta(String),
    /// The model finished; `full_text` is authoritative
    Done {
        full_text: String,
        persisted_id: Option<String>,
    },
}

pub type GenerationStream = BoxStream<'static, Result<GenerationEvent, TransportError>>;

#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Open a generation stream
    ///
    /// Implementations should stop producing events once `cancel` fires.
    async fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationStream, TransportError>;
}
