//! Streaming generation sessions
//!
//! One cancellable text generation per conversation, revealed at a bounded
//! rate and guarded against writes after navigation.

pub mod controller;
pub mod transport;
pub mod typewriter;
pub mod view;

pub use controller::{
    NoopCallbacks, SessionCallbacks, SessionConfig, SessionController, SessionHandle,
    SessionOutcome, SessionPhase, SessionRequest, StopReason,
};
pub use transport::{
    GenerationEvent, GenerationRequest, GenerationStream, GenerationTransport, TransportError,
};
pub use typewriter::{RevealFrame, RevealSink, Typewriter};
pub use view::{ChatView, GenerationFailure, ViewSnapshot, ViewToken};
