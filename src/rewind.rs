//! Transcript rewind: edit a past user turn or regenerate a reply
//!
//! Both operations truncate the transcript, recompute the context through
//! the compactor and start a new session. Neither runs while the
//! conversation already has a live session.

use std::sync::Arc;
use tracing::info;

use crate::conversation::{Role, Turn};
use crate::engine::ChatEngine;
use crate::error::{ChatError, Result};
use crate::persistence::truncate_logged;
use crate::session::controller::{SessionCallbacks, SessionHandle};

/// Transcript after editing `turn_id`: everything after it dropped, its text replaced
pub fn plan_edit(turns: &[Turn], turn_id: &str, new_text: &str) -> Result<Vec<Turn>> {
    let index = turns
        .iter()
        .position(|t| t.id == turn_id)
        .ok_or_else(|| ChatError::TurnNotFound(turn_id.to_string()))?;

    if turns[index].role != Role::User {
        return Err(ChatError::InvalidRewindTarget(format!(
            "turn {} is not a user turn",
            turn_id
        )));
    }

    let mut kept = turns[..=index].to_vec();
    let edited = &mut kept[index];
    edited.text = new_text.to_string();
    edited.persisted_id = None;
    Ok(kept)
}

/// Number of turns in `turns` that made it to storage
///
/// Failed media turns, placeholders and turns whose write failed never get a
/// stored id, so the transcript index is not the stored position.
pub fn stored_count(turns: &[Turn]) -> usize {
    turns.iter().filter(|t| t.persisted_id.is_some()).count()
}

/// Transcript left after removing the reply `turn_id`, and the user turn it answered
pub fn plan_regenerate(turns: &[Turn], turn_id: &str) -> Result<(Vec<Turn>, String)> {
    let index = turns
        .iter()
        .position(|t| t.id == turn_id)
        .ok_or_else(|| ChatError::TurnNotFound(turn_id.to_string()))?;

    if turns[index].role != Role::Assistant {
        return Err(ChatError::InvalidRewindTarget(format!(
            "turn {} is not an assistant turn",
            turn_id
        )));
    }

    if index + 1 != turns.len() {
        return Err(ChatError::InvalidRewindTarget(format!(
            "turn {} is not the latest reply",
            turn_id
        )));
    }

    let user_turn = turns[..index]
        .iter()
        .rev()
        .find(|t| t.role == Role::User)
        .ok_or_else(|| {
            ChatError::InvalidRewindTarget(format!("turn {} has no preceding user turn", turn_id))
        })?;

    Ok((turns[..index].to_vec(), user_turn.id.clone()))
}

impl ChatEngine {
    /// Rewrite a user turn and regenerate everything after it
    pub async fn edit(
        &self,
        turn_id: &str,
        new_text: &str,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Option<SessionHandle>> {
        let token = self.view.current_token().ok_or(ChatError::NoActiveConversation)?;
        let conversation_id = token.conversation_id().to_string();
        if self.sessions.is_active(&conversation_id) {
            return Err(ChatError::SessionActive(conversation_id));
        }

        let mut planned = None;
        self.view.apply(&token, |v| {
            let plan = plan_edit(&v.turns, turn_id, new_text);
            if let Ok(kept) = &plan {
                v.turns = kept.clone();
                v.failure = None;
            }
            planned = Some(plan);
        });
        let kept = match planned {
            Some(plan) => plan?,
            None => return Ok(None),
        };

        let index = kept.len() - 1;
        let edited = &kept[index];
        let keep = stored_count(&kept[..index]);
        info!(conversation_id = %conversation_id, index, keep, "Editing user turn");

        truncate_logged(self.persistence.as_ref(), &conversation_id, keep).await;
        self.persist_user_turn(&token, &edited.id, new_text).await;

        let model = self.current_model()?;
        self.start_generation(
            &token,
            &model,
            &kept,
            Some(edited.id.clone()),
            edited.media.clone(),
            callbacks,
        )
        .await
    }

    /// Drop an assistant reply and generate a new one for the same prompt
    pub async fn regenerate(
        &self,
        assistant_turn_id: &str,
        callbacks: Arc<dyn SessionCallbacks>,
    ) -> Result<Option<SessionHandle>> {
        let token = self.view.current_token().ok_or(ChatError::NoActiveConversation)?;
        let conversation_id = token.conversation_id().to_string();
        if self.sessions.is_active(&conversation_id) {
            return Err(ChatError::SessionActive(conversation_id));
        }

        let mut planned = None;
        self.view.apply(&token, |v| {
            let plan = plan_regenerate(&v.turns, assistant_turn_id);
            if let Ok((kept, _)) = &plan {
                v.turns.truncate(kept.len());
                v.failure = None;
            }
            planned = Some(plan);
        });
        let (kept, user_turn_id) = match planned {
            Some(plan) => plan?,
            None => return Ok(None),
        };

        let keep = stored_count(&kept);
        info!(conversation_id = %conversation_id, keep, "Regenerating reply");
        truncate_logged(self.persistence.as_ref(), &conversation_id, keep).await;

        let attachments = kept
            .iter()
            .find(|t| t.id == user_turn_id)
            .map(|t| t.media.clone())
            .unwrap_or_default();

        let model = self.current_model()?;
        self.start_generation(&token, &model, &kept, Some(user_turn_id), attachments, callbacks)
            .await
    }
}
