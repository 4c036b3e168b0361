//! Active conversation view
//!
//! The view owns the visible transcript. Every writer holds a `ViewToken`
//! taken when it started; `apply` checks the token and mutates under one lock,
//! so a writer whose conversation is no longer displayed changes nothing.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::conversation::{Conversation, Turn};
use crate::metrics::METRICS;

/// Proof that a writer targets the conversation displayed at a given epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewToken {
    conversation_id: String,
    epoch: u64,
}

impl ViewToken {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// User-visible, retryable generation failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationFailure {
    pub conversation_id: String,
    /// The user turn whose content a retry resends
    pub user_turn_id: Option<String>,
    pub message: String,
    pub retryable: bool,
}

/// One rendered frame of the active conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ViewSnapshot {
    pub conversation_id: Option<String>,
    pub model_id: Option<String>,
    pub turns: Vec<Turn>,
    pub streaming: bool,
    /// Revealed portion of the in-flight reply
    pub streaming_text: String,
    pub failure: Option<GenerationFailure>,
    pub context_usage_percent: f32,
}

impl ViewSnapshot {
    pub fn turn_index(&self, turn_id: &str) -> Option<usize> {
        self.turns.iter().position(|t| t.id == turn_id)
    }

    /// Replace the turn with `turn_id`; returns false if it is gone
    pub fn replace_turn(&mut self, turn_id: &str, turn: Turn) -> bool {
        match self.turn_index(turn_id) {
            Some(index) => {
                self.turns[index] = turn;
                true
            }
            None => false,
        }
    }
}

struct ViewState {
    epoch: u64,
    conversation_id: Option<String>,
}

impl ViewState {
    fn accepts(&self, token: &ViewToken) -> bool {
        self.epoch == token.epoch
            && self.conversation_id.as_deref() == Some(token.conversation_id.as_str())
    }
}

/// The snapshot lives in the watch channel and is edited in place, so a
/// write costs only what the mutation touches.
pub struct ChatView {
    state: Mutex<ViewState>,
    frames: watch::Sender<ViewSnapshot>,
}

impl Default for ChatView {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatView {
    pub fn new() -> Self {
        let (frames, _) = watch::channel(ViewSnapshot::default());
        Self {
            state: Mutex::new(ViewState {
                epoch: 0,
                conversation_id: None,
            }),
            frames,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Display `conversation`, invalidating every token issued before
    pub fn open(&self, conversation: &Conversation) -> ViewToken {
        let mut state = self.lock();
        state.epoch += 1;
        state.conversation_id = Some(conversation.id.clone());
        self.frames.send_replace(ViewSnapshot {
            conversation_id: Some(conversation.id.clone()),
            model_id: Some(conversation.model_id.clone()),
            turns: conversation.turns.clone(),
            ..Default::default()
        });
        debug!(conversation_id = %conversation.id, epoch = state.epoch, "Opened conversation");

        ViewToken {
            conversation_id: conversation.id.clone(),
            epoch: state.epoch,
        }
    }

    /// Dispose the view; outstanding tokens go stale
    pub fn close(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.conversation_id = None;
        self.frames.send_replace(ViewSnapshot::default());
    }

    pub fn current_token(&self) -> Option<ViewToken> {
        let state = self.lock();
        state
            .conversation_id
            .as_ref()
            .map(|id| ViewToken {
                conversation_id: id.clone(),
                epoch: state.epoch,
            })
    }

    pub fn is_current(&self, token: &ViewToken) -> bool {
        self.lock().accepts(token)
    }

    /// Mutate the visible state if `token` is still current
    ///
    /// Returns false, leaving the view untouched, for a stale token.
    pub fn apply<F>(&self, token: &ViewToken, mutate: F) -> bool
    where
        F: FnOnce(&mut ViewSnapshot),
    {
        let state = self.lock();
        if !state.accepts(token) {
            METRICS.record_stale_write();
            debug!(
                conversation_id = %token.conversation_id,
                epoch = token.epoch,
                "Suppressed write from a conversation that is no longer displayed"
            );
            return false;
        }

        self.frames.send_modify(mutate);
        drop(state);
        true
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.frames.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.frames.subscribe()
    }
}
