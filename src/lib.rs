//! Conversational streaming and context-management engine
//!
//! - Fits conversation history into a model's token budget, summarizing overflow
//! - Drives one cancellable generation per conversation, guarded against
//!   writes after the user navigates away
//! - Reveals streamed text at a bounded rate
//! - Tracks detached image/video jobs through submit and poll
//! - Edits or regenerates past turns and recomputes everything downstream

pub mod config;
pub mod context;
pub mod conversation;
pub mod engine;
pub mod error;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod persistence;
pub mod registry;
pub mod rewind;
pub mod session;

pub use config::Config;
pub use engine::{ChatEngine, EngineDeps};
pub use error::{ChatError, Result};

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::context::{CompactedContext, ContextCompactor, ContextTurn, Summarizer};
    pub use crate::conversation::{Conversation, MediaKind, MediaLocator, Role, Turn, TurnStatus};
    pub use crate::engine::{ChatEngine, EngineDeps};
    pub use crate::error::{ChatError, Result};
    pub use crate::media::{MediaDispatch, MediaParams, StudioBoard};
    pub use crate::persistence::Persistence;
    pub use crate::registry::{ModelInfo, ModelKind, ModelRegistry, StaticModelRegistry};
    pub use crate::session::{
        GenerationEvent, GenerationRequest, GenerationStream, GenerationTransport,
        SessionCallbacks, SessionHandle, SessionOutcome, ViewSnapshot, ViewToken,
    };
}
