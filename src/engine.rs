//! Chat engine facade
//!
//! Wires the registry, compactor, view, session controller, media tracker
//! and persistence together behind the operations a chat UI needs.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::compactor::ContextCompactor;
use crate::context::summarizer::Summarizer;
use crate::context::token_budget::TokenBudgetPolicy;
use crate::conversation::{context_of, Conversation, MediaKind, MediaLocator, Role, Turn};
use crate::error::{ChatError, Result};
use crate::media::dispatch::MediaDispatch;
use crate::media::models::MediaParams;
use crate::media::tracker::MediaJobTracker;
use crate::persistence::{append_logged, Persistence};
use crate::registry::{ModelInfo, ModelKind, ModelRegistry};
use crate::session::controller::{SessionCallbacks, SessionController, SessionHandle, SessionRequest};
use crate::session::transport::GenerationTransport;
use crate::session::view::{ChatView, ViewSnapshot, ViewToken};

/// External collaborators the engine is built on
pub struct EngineDeps {
    pub registry: Arc<dyn ModelRegistry>,
    pub summarizer: Arc<dyn Summarizer>,
    pub transport: Arc<dyn GenerationTransport>,
    pub persistence: Arc<dyn Persistence>,
    pub dispatch: Arc<dyn MediaDispatch>,
}

pub struct ChatEngine {
    pub(crate) registry: Arc<dyn ModelRegistry>,
    pub(crate) budget: TokenBudgetPolicy,
    pub(crate) compactor: ContextCompactor,
    pub(crate) view: Arc<ChatView>,
    pub(crate) sessions: SessionController,
    pub(crate) media: MediaJobTracker,
    pub(crate) persistence: Arc<dyn Persistence>,
    default_model: String,
}

impl ChatEngine {
    pub fn new(config: &Config, deps: EngineDeps) -> Self {
        let view = Arc::new(ChatView::new());
        let compactor = ContextCompactor::from_config(deps.summarizer, config.compaction.clone());
        let sessions = SessionController::new(
            deps.transport,
            deps.persistence.clone(),
            view.clone(),
            config.session.clone(),
        );
        let media = MediaJobTracker::new(
            deps.dispatch,
            deps.persistence.clone(),
            view.clone(),
            config.media.clone(),
        );

        Self {
            registry: deps.registry,
            budget: TokenBudgetPolicy::new(config.budget.clone()),
            compactor,
            view,
            sessions,
            media,
            persistence: deps.persistence,
            default_model: config.default_model.clone(),
        }
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        self.view.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewSnapshot> {
        self.view.subscribe()
    }

    pub fn view(&self) -> &Arc<ChatView> {
        &self.view
    }

    pub fn sessions(&self) -> &SessionController {
        &self.sessions
    }

    pub fn media(&self) -> &MediaJobTracker {
        &self.media
    }

    pub fn compactor(&self) -> &ContextCompactor {
        &self.compactor
    }

    /// Display `conversation`, abandoning whatever the previous one had in flight
    pub async fn open_conversation(&self, conversation: &Conversation) -> ViewToken {
        let token = self.view.open(conversation);

        let aborted = self.sessions.abort_stale();
        self.media.dispose();
        self.compactor.reset();

        info!(
            conversation_id = %conversation.id,
            turns = conversation.turns.len(),
            aborted,
            "Switched conversation"
        );
        token
    }

    /// Leave the current conversation without opening another
    pub fn close(&self) {
        self.view.close();
        self.sessions.abort_stale();
        self.media.dispose();
    }

    /// Switch the model used for the next send
    pub fn select_model(&self, model_id: &str) -> Result<ModelInfo> {
        let token = self.view.current_token().ok_or(ChatError::NoActiveConversation)?;
        let model = self.lookup(model_id)?;
        self.view.apply(&token, |v| v.model_id = Some(model.id.clone()));
        Ok(model)
    }

    pub fn is_streaming(&self) -> bool {
        self.view
            .current_token()
            .map(|token| self.sessions.is_active(token.conversation_id()))
            .unwrap_or(false)
    }

    pub fn context_usage_percent(&self) -> f32 {
        self.view.snapshot().context_usage_percent
    }

    /// Send a user message
    ///
    /// Creates a conversation on first send. Image and video models route the
    /// text to the media tracker as a prompt; chat models start a session.
    pub async fn send(
        &self,
        text: &str,
        attachments: Vec<MediaLocator>,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Option<SessionHandle>> {
        if text.trim().is_empty() && attachments.is_empty() {
            return Ok(None);
        }

        let token = match self.view.current_token() {
            Some(token) => token,
            None => {
                let conversation = Conversation::new(self.default_model.clone());
                self.open_conversation(&conversation).await
            }
        };
        let model = self.current_model()?;

        if model.kind == ModelKind::Chat && self.sessions.is_active(token.conversation_id()) {
            return Err(ChatError::SessionActive(token.conversation_id().to_string()));
        }

        let user_turn = Turn::user(text).with_media(attachments.clone());
        let user_turn_id = user_turn.id.clone();
        if !self.view.apply(&token, |v| {
            v.turns.push(user_turn);
            v.failure = None;
        }) {
            return Ok(None);
        }
        self.persist_user_turn(&token, &user_turn_id, text).await;

        match model.kind {
            ModelKind::Image | ModelKind::Video => {
                let kind = if model.kind == ModelKind::Image {
                    MediaKind::Image
                } else {
                    MediaKind::Video
                };
                self.media
                    .submit(&token, kind, text, &model.id, &MediaParams::default())
                    .await?;
                Ok(None)
            }
            ModelKind::Chat => {
                let turns = self.view.snapshot().turns;
                self.start_generation(&token, &model, &turns, Some(user_turn_id), attachments, callbacks)
                    .await
            }
        }
    }

    /// Stop the current conversation's generation, keeping confirmed text
    pub fn stop(&self) -> bool {
        match self.view.current_token() {
            Some(token) => self.sessions.stop(token.conversation_id()),
            None => false,
        }
    }

    /// Resend the user turn behind the pending generation failure
    pub async fn retry(&self, callbacks: Arc<dyn SessionCallbacks>) -> Result<Option<SessionHandle>> {
        let token = self.view.current_token().ok_or(ChatError::NoActiveConversation)?;
        if self.sessions.is_active(token.conversation_id()) {
            return Err(ChatError::SessionActive(token.conversation_id().to_string()));
        }

        let snapshot = self.view.snapshot();
        let failure = snapshot.failure.ok_or(ChatError::NothingToRetry)?;
        let end = match &failure.user_turn_id {
            Some(turn_id) => snapshot
                .turns
                .iter()
                .position(|t| &t.id == turn_id)
                .map(|index| index + 1)
                .ok_or_else(|| ChatError::TurnNotFound(turn_id.clone()))?,
            None => snapshot.turns.len(),
        };
        let turns = &snapshot.turns[..end];
        let attachments = turns
            .last()
            .filter(|t| t.role == Role::User)
            .map(|t| t.media.clone())
            .unwrap_or_default();

        debug!(conversation_id = token.conversation_id(), "Retrying failed generation");
        self.view.apply(&token, |v| v.failure = None);

        let model = self.current_model()?;
        self.start_generation(&token, &model, turns, failure.user_turn_id, attachments, callbacks)
            .await
    }

    /// Explicit media command, independent of the selected model
    pub async fn generate_media(
        &self,
        kind: MediaKind,
        prompt: &str,
        model_id: &str,
        params: &MediaParams,
    ) -> Result<String> {
        let token = self.view.current_token().ok_or(ChatError::NoActiveConversation)?;
        let model = self.lookup(model_id)?;
        self.media.submit(&token, kind, prompt, &model.id, params).await
    }

    pub(crate) fn lookup(&self, model_id: &str) -> Result<ModelInfo> {
        self.registry
            .lookup(model_id)
            .ok_or_else(|| ChatError::UnknownModel(model_id.to_string()))
    }

    pub(crate) fn current_model(&self) -> Result<ModelInfo> {
        let model_id = self
            .view
            .snapshot()
            .model_id
            .unwrap_or_else(|| self.default_model.clone());
        self.lookup(&model_id)
    }

    /// Persist a user turn and record its stored id; failures are only logged
    pub(crate) async fn persist_user_turn(&self, token: &ViewToken, turn_id: &str, text: &str) {
        let stored = append_logged(
            self.persistence.as_ref(),
            token.conversation_id(),
            Role::User,
            text,
        )
        .await;

        if let Some(stored) = stored {
            self.view.apply(token, |v| {
                if let Some(index) = v.turn_index(turn_id) {
                    v.turns[index].persisted_id = Some(stored);
                }
            });
        }
    }

    /// Compact `turns` for `model` and start a session with the result
    pub(crate) async fn start_generation(
        &self,
        token: &ViewToken,
        model: &ModelInfo,
        turns: &[Turn],
        user_turn_id: Option<String>,
        attachments: Vec<MediaLocator>,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Option<SessionHandle>> {
        let budget = self.budget.budget_for(model);
        let compacted = self
            .compactor
            .compact_and_fit(&context_of(turns), budget)
            .await;
        self.view
            .apply(token, |v| v.context_usage_percent = compacted.usage_percent);

        self.sessions.start(
            SessionRequest {
                token: token.clone(),
                turns: compacted.turns,
                model_id: model.id.clone(),
                attachments,
                user_turn_id,
            },
            callbacks,
        )
    }
}
