//! Conversation and turn data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::models::ContextTurn;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Synthetic entries such as a compaction synopsis
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Kind of generated media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// Location of an attached or generated media artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLocator {
    pub kind: MediaKind,
    pub url: String,
}

impl MediaLocator {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
        }
    }
}

/// Lifecycle status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Complete,
    /// Generation was stopped by the user midway
    Stopped,
    /// Media placeholder waiting on a detached job
    Pending,
    Failed,
}

/// One authored message in a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_id: Option<String>,
    pub status: TurnStatus,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>, status: TurnStatus) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.into(),
            media: Vec::new(),
            model_id: None,
            persisted_id: None,
            status,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, TurnStatus::Complete)
    }

    pub fn assistant(text: impl Into<String>, model_id: impl Into<String>) -> Self {
        let mut turn = Self::new(Role::Assistant, text, TurnStatus::Complete);
        turn.model_id = Some(model_id.into());
        turn
    }

    /// Assistant turn terminated by the user before the model finished
    pub fn stopped(text: impl Into<String>, model_id: impl Into<String>) -> Self {
        let mut turn = Self::assistant(text, model_id);
        turn.status = TurnStatus::Stopped;
        turn
    }

    /// In-progress placeholder for a detached media job
    pub fn media_placeholder(kind: MediaKind, prompt: &str, model_id: &str) -> Self {
        let mut turn = Self::new(
            Role::Assistant,
            format!("Generating {}: {}", kind.as_str(), prompt),
            TurnStatus::Pending,
        );
        turn.model_id = Some(model_id.to_string());
        turn
    }

    pub fn media_result(prompt: &str, model_id: &str, media: Vec<MediaLocator>) -> Self {
        let mut turn = Self::assistant(prompt, model_id);
        turn.media = media;
        turn
    }

    pub fn media_failed(kind: MediaKind, model_id: &str, reason: &str) -> Self {
        let mut turn = Self::new(
            Role::Assistant,
            format!("{} generation failed: {}", kind.as_str(), reason),
            TurnStatus::Failed,
        );
        turn.model_id = Some(model_id.to_string());
        turn
    }

    pub fn with_media(mut self, media: Vec<MediaLocator>) -> Self {
        self.media = media;
        self
    }

    pub fn with_persisted_id(mut self, persisted_id: Option<String>) -> Self {
        self.persisted_id = persisted_id;
        self
    }

    /// Whether this turn should be sent to the model as history
    pub fn is_context(&self) -> bool {
        matches!(self.status, TurnStatus::Complete | TurnStatus::Stopped)
    }

    pub fn to_context(&self) -> ContextTurn {
        ContextTurn::new(self.role, self.text.clone())
    }

    /// Text form used when the turn is written to durable storage
    pub fn durable_text(&self) -> String {
        if self.media.is_empty() {
            return self.text.clone();
        }
        let urls: Vec<&str> = self.media.iter().map(|m| m.url.as_str()).collect();
        format!("{}\n\n{}", self.text, urls.join("\n"))
    }
}

/// Context turns for every history entry in `turns`
pub fn context_of(turns: &[Turn]) -> Vec<ContextTurn> {
    turns
        .iter()
        .filter(|t| t.is_context())
        .map(Turn::to_context)
        .collect()
}

/// A conversation and its ordered transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub model_id: String,
    #[serde(default)]
    pub turns: Vec<Turn>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            model_id: model_id.into(),
            turns: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_turns(mut self, turns: Vec<Turn>) -> Self {
        self.turns = turns;
        self
    }
}
