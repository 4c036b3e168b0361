//! Streaming session controller
//!
//! Drives one text generation per conversation:
//! Idle → Sending → Streaming → Finalizing → Idle, with Cancelled reachable
//! from Sending/Streaming and Errored reachable from Streaming.
//!
//! Every write into the visible transcript goes through `ChatView::apply`
//! with the token captured at start, so a session whose conversation was
//! navigated away from finishes quietly without touching the view.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{GenerationEvent, GenerationRequest, GenerationTransport, TransportError};
use super::typewriter::{RevealFrame, RevealSink, Typewriter};
use super::view::{ChatView, GenerationFailure, ViewToken};
use crate::context::models::ContextTurn;
use crate::conversation::{MediaLocator, Role, Turn};
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use crate::persistence::{append_logged, Persistence};

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_reveal_tick_ms")]
    pub reveal_tick_ms: u64,
    #[serde(default = "default_chars_per_tick")]
    pub chars_per_tick: usize,
    /// Pause between the final reveal and committing the turn
    #[serde(default = "default_finalize_settle_ms")]
    pub finalize_settle_ms: u64,
    #[serde(default = "default_stopped_marker")]
    pub stopped_marker: String,
}

fn default_reveal_tick_ms() -> u64 { 10 }
fn default_chars_per_tick() -> usize { 1 }
fn default_finalize_settle_ms() -> u64 { 50 }
fn default_stopped_marker() -> String { "_(stopped midway)_".to_string() }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reveal_tick_ms: default_reveal_tick_ms(),
            chars_per_tick: default_chars_per_tick(),
            finalize_settle_ms: default_finalize_settle_ms(),
            stopped_marker: default_stopped_marker(),
        }
    }
}

impl SessionConfig {
    pub fn reveal_tick(&self) -> Duration {
        Duration::from_millis(self.reveal_tick_ms)
    }

    pub fn finalize_settle(&self) -> Duration {
        Duration::from_millis(self.finalize_settle_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Sending,
    Streaming,
    Finalizing,
    Cancelled,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The user pressed stop; confirmed text is kept
    UserStop,
    /// The conversation is no longer displayed; output is discarded
    Navigation,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed {
        text: String,
        persisted_id: Option<String>,
    },
    /// `text` is the committed turn text, if anything had been confirmed
    Stopped { text: Option<String> },
    Discarded,
    Failed { message: String },
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Stopped { .. } => "stopped",
            Self::Discarded => "discarded",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Observer of a session's visible progress
///
/// Each method fires only while the session's conversation is displayed.
pub trait SessionCallbacks: Send + Sync {
    fn on_increment(&self, _text: &str) {}
    fn on_complete(&self, _full_text: &str, _persisted_id: Option<&str>) {}
    fn on_error(&self, _failure: &GenerationFailure) {}
}

pub struct NoopCallbacks;

impl SessionCallbacks for NoopCallbacks {}

/// Everything needed to start a generation
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub token: ViewToken,
    pub turns: Vec<ContextTurn>,
    pub model_id: String,
    pub attachments: Vec<MediaLocator>,
    /// User turn whose content a retry would resend
    pub user_turn_id: Option<String>,
}

struct LiveSession {
    session_id: String,
    token: ViewToken,
    cancel: CancellationToken,
    stop_reason: Arc<OnceCell<StopReason>>,
}

impl LiveSession {
    fn abort(&self, reason: StopReason) {
        // First reason wins
        let _ = self.stop_reason.set(reason);
        self.cancel.cancel();
    }
}

/// Handle to a running session
pub struct SessionHandle {
    session_id: String,
    conversation_id: String,
    phase: watch::Receiver<SessionPhase>,
    cancel: CancellationToken,
    stop_reason: Arc<OnceCell<StopReason>>,
    join: JoinHandle<SessionOutcome>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn phase_watch(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Ask the transport to abort, keeping whatever was confirmed
    pub fn stop(&self) {
        let _ = self.stop_reason.set(StopReason::UserStop);
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<SessionOutcome> {
        self.join
            .await
            .map_err(|e| ChatError::Internal(format!("Session task failed: {}", e)))
    }
}

pub struct SessionController {
    transport: Arc<dyn GenerationTransport>,
    persistence: Arc<dyn Persistence>,
    view: Arc<ChatView>,
    config: SessionConfig,
    live: Arc<DashMap<String, LiveSession>>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn GenerationTransport>,
        persistence: Arc<dyn Persistence>,
        view: Arc<ChatView>,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            persistence,
            view,
            config,
            live: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a generation for the conversation named by `request.token`
    ///
    /// Returns `Ok(None)` when there is nothing to send or the token is
    /// already stale.
    pub fn start(
        &self,
        request: SessionRequest,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Option<SessionHandle>> {
        if request.turns.is_empty() && request.attachments.is_empty() {
            debug!("Nothing to send, not starting a session");
            return Ok(None);
        }
        if !self.view.is_current(&request.token) {
            debug!(
                conversation_id = request.token.conversation_id(),
                "Conversation is no longer displayed, not starting a session"
            );
            return Ok(None);
        }

        let conversation_id = request.token.conversation_id().to_string();
        let session_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let stop_reason = Arc::new(OnceCell::new());

        match self.live.entry(conversation_id.clone()) {
            Entry::Occupied(_) => return Err(ChatError::SessionActive(conversation_id)),
            Entry::Vacant(slot) => {
                slot.insert(LiveSession {
                    session_id: session_id.clone(),
                    token: request.token.clone(),
                    cancel: cancel.clone(),
                    stop_reason: stop_reason.clone(),
                });
            }
        }

        self.view.apply(&request.token, |v| {
            v.streaming = true;
            v.streaming_text.clear();
            v.failure = None;
        });

        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Sending);
        info!(
            conversation_id = %conversation_id,
            session_id = %session_id,
            model_id = %request.model_id,
            turns = request.turns.len(),
            "Starting generation session"
        );

        let task = SessionTask {
            session_id: session_id.clone(),
            request,
            transport: self.transport.clone(),
            persistence: self.persistence.clone(),
            view: self.view.clone(),
            config: self.config.clone(),
            callbacks,
            cancel: cancel.clone(),
            stop_reason: stop_reason.clone(),
            phase: phase_tx,
            live: self.live.clone(),
        };
        let join = tokio::spawn(task.run());

        Ok(Some(SessionHandle {
            session_id,
            conversation_id,
            phase: phase_rx,
            cancel,
            stop_reason,
            join,
        }))
    }

    /// User-initiated stop; returns false if nothing was live
    pub fn stop(&self, conversation_id: &str) -> bool {
        match self.live.get(conversation_id) {
            Some(live) => {
                info!(conversation_id, session_id = %live.session_id, "Stopping generation");
                live.abort(StopReason::UserStop);
                true
            }
            None => false,
        }
    }

    /// Cancel every live session whose conversation is no longer displayed
    pub fn abort_stale(&self) -> usize {
        let mut aborted = 0;
        for live in self.live.iter() {
            if !self.view.is_current(&live.token) {
                debug!(
                    conversation_id = live.token.conversation_id(),
                    session_id = %live.session_id,
                    "Aborting session after navigation"
                );
                live.abort(StopReason::Navigation);
                aborted += 1;
            }
        }
        aborted
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.live.contains_key(conversation_id)
    }

    pub fn active_count(&self) -> usize {
        self.live.len()
    }
}

enum StreamEnd {
    Done {
        full_text: Option<String>,
        persisted_id: Option<String>,
    },
    Cancelled,
    Failed(TransportError),
}

struct SessionTask {
    session_id: String,
    request: SessionRequest,
    transport: Arc<dyn GenerationTransport>,
    persistence: Arc<dyn Persistence>,
    view: Arc<ChatView>,
    config: SessionConfig,
    callbacks: Arc<dyn SessionCallbacks>,
    cancel: CancellationToken,
    stop_reason: Arc<OnceCell<StopReason>>,
    phase: watch::Sender<SessionPhase>,
    live: Arc<DashMap<String, LiveSession>>,
}

impl SessionTask {
    async fn run(self) -> SessionOutcome {
        let started = Instant::now();
        let outcome = self.drive().await;

        self.live.remove_if(self.conversation_id(), |_, live| {
            live.session_id == self.session_id
        });
        METRICS.record_session(outcome.label(), started.elapsed().as_secs_f64());
        info!(
            conversation_id = self.conversation_id(),
            session_id = %self.session_id,
            outcome = outcome.label(),
            "Generation session ended"
        );

        outcome
    }

    fn conversation_id(&self) -> &str {
        self.request.token.conversation_id()
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    /// Whether the view still shows this conversation; aborts the transport if not
    fn guard_current(&self) -> bool {
        if self.view.is_current(&self.request.token) {
            return true;
        }
        let _ = self.stop_reason.set(StopReason::Navigation);
        self.cancel.cancel();
        false
    }

    fn reveal_sink(&self) -> Arc<dyn RevealSink> {
        let view = self.view.clone();
        let token = self.request.token.clone();
        Arc::new(move |frame: RevealFrame| {
            view.apply(&token, |v| frame.apply_to(&mut v.streaming_text));
        })
    }

    async fn drive(&self) -> SessionOutcome {
        let request = GenerationRequest {
            conversation_id: self.conversation_id().to_string(),
            turns: self.request.turns.clone(),
            model_id: self.request.model_id.clone(),
            attachments: self.request.attachments.clone(),
        };

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.transport.generate(request, self.cancel.child_token()) => Some(result),
        };

        let mut stream = match opened {
            None => return self.cancelled(None).await,
            Some(Err(e)) => {
                self.set_phase(SessionPhase::Streaming);
                return self.failed(e);
            }
            Some(Ok(stream)) => stream,
        };

        self.set_phase(SessionPhase::Streaming);
        self.guard_current();

        let typewriter = Typewriter::new(
            self.reveal_sink(),
            self.config.reveal_tick(),
            self.config.chars_per_tick,
        );

        let end = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StreamEnd::Cancelled,
                next = stream.next() => match next {
                    Some(Ok(GenerationEvent::Delta(text))) => {
                        debug!(session_id = %self.session_id, chars = text.chars().count(), "Received increment");
                        typewriter.push(&text);
                        if self.guard_current() {
                            self.callbacks.on_increment(&text);
                        }
                    }
                    Some(Ok(GenerationEvent::Done { full_text, persisted_id })) => {
                        break StreamEnd::Done { full_text: Some(full_text), persisted_id };
                    }
                    Some(Err(e)) => break StreamEnd::Failed(e),
                    None if typewriter.lengths().1 > 0 => {
                        break StreamEnd::Done { full_text: None, persisted_id: None };
                    }
                    None => break StreamEnd::Failed(TransportError::Interrupted),
                },
            }
        };
        drop(stream);

        match end {
            StreamEnd::Done {
                full_text,
                persisted_id,
            } => self.finish(typewriter, full_text, persisted_id).await,
            StreamEnd::Cancelled => self.cancelled(Some(typewriter)).await,
            StreamEnd::Failed(e) => {
                drop(typewriter);
                self.failed(e)
            }
        }
    }

    async fn finish(
        &self,
        typewriter: Typewriter,
        full_text: Option<String>,
        persisted_id: Option<String>,
    ) -> SessionOutcome {
        self.set_phase(SessionPhase::Finalizing);
        let text = typewriter.finalize(full_text.as_deref());
        drop(typewriter);

        tokio::time::sleep(self.config.finalize_settle()).await;

        let persisted_id = match persisted_id {
            Some(id) => Some(id),
            None => {
                append_logged(
                    self.persistence.as_ref(),
                    self.conversation_id(),
                    Role::Assistant,
                    &text,
                )
                .await
            }
        };

        let turn = Turn::assistant(text.clone(), self.request.model_id.clone())
            .with_persisted_id(persisted_id.clone());
        // Turn lands and streaming clears in the same frame
        let committed = self.view.apply(&self.request.token, |v| {
            v.turns.push(turn);
            v.streaming = false;
            v.streaming_text.clear();
        });
        if committed {
            self.callbacks.on_complete(&text, persisted_id.as_deref());
        }

        self.set_phase(SessionPhase::Idle);
        SessionOutcome::Completed { text, persisted_id }
    }

    async fn cancelled(&self, typewriter: Option<Typewriter>) -> SessionOutcome {
        let reason = self
            .stop_reason
            .get()
            .copied()
            .unwrap_or(StopReason::UserStop);
        let confirmed = typewriter
            .as_ref()
            .map(Typewriter::confirmed_text)
            .unwrap_or_default();
        drop(typewriter);
        self.set_phase(SessionPhase::Cancelled);

        let clear_streaming = |v: &mut super::view::ViewSnapshot| {
            v.streaming = false;
            v.streaming_text.clear();
        };

        match reason {
            StopReason::Navigation => {
                debug!(session_id = %self.session_id, "Discarding output of navigated-away session");
                self.view.apply(&self.request.token, clear_streaming);
                SessionOutcome::Discarded
            }
            StopReason::UserStop if confirmed.is_empty() => {
                self.view.apply(&self.request.token, clear_streaming);
                SessionOutcome::Stopped { text: None }
            }
            StopReason::UserStop => {
                let text = format!("{}\n\n{}", confirmed, self.config.stopped_marker);
                let turn = Turn::stopped(text.clone(), self.request.model_id.clone());
                let turn_id = turn.id.clone();

                let committed = self.view.apply(&self.request.token, |v| {
                    v.turns.push(turn);
                    clear_streaming(v);
                });

                let persisted_id = append_logged(
                    self.persistence.as_ref(),
                    self.conversation_id(),
                    Role::Assistant,
                    &text,
                )
                .await;

                if let (true, Some(id)) = (committed, persisted_id) {
                    self.view.apply(&self.request.token, |v| {
                        if let Some(index) = v.turn_index(&turn_id) {
                            v.turns[index].persisted_id = Some(id);
                        }
                    });
                }

                SessionOutcome::Stopped { text: Some(text) }
            }
        }
    }

    fn failed(&self, error: TransportError) -> SessionOutcome {
        self.set_phase(SessionPhase::Errored);
        warn!(
            conversation_id = self.conversation_id(),
            session_id = %self.session_id,
            "Generation failed: {}", error
        );

        let failure = GenerationFailure {
            conversation_id: self.conversation_id().to_string(),
            user_turn_id: self.request.user_turn_id.clone(),
            message: error.to_string(),
            retryable: true,
        };
        let shown = self.view.apply(&self.request.token, |v| {
            v.streaming = false;
            v.streaming_text.clear();
            v.failure = Some(failure.clone());
        });
        if shown {
            self.callbacks.on_error(&failure);
        }

        SessionOutcome::Failed {
            message: error.to_string(),
        }
    }
}
