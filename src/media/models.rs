//! Media job data models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::{MediaKind, MediaLocator};

/// Status vocabulary reported by the media service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "running", alias = "processing")]
    Generating,
    Downloading,
    #[serde(alias = "succeeded", alias = "success")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl RemoteJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status report for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status: RemoteJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusReport {
    pub fn new(status: RemoteJobStatus) -> Self {
        Self {
            status,
            result_url: None,
            result_urls: Vec::new(),
            error: None,
        }
    }

    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            result_url: Some(url.into()),
            ..Self::new(RemoteJobStatus::Completed)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(RemoteJobStatus::Failed)
        }
    }

    /// Every distinct result URL, single-URL field first
    pub fn locators(&self, kind: MediaKind) -> Vec<MediaLocator> {
        let mut urls: Vec<&String> = Vec::with_capacity(self.result_urls.len() + 1);
        for url in self.result_url.iter().chain(self.result_urls.iter()) {
            if !url.is_empty() && !urls.contains(&url) {
                urls.push(url);
            }
        }
        urls.into_iter()
            .map(|url| MediaLocator::new(kind, url.clone()))
            .collect()
    }

    /// Human-readable failure reason for a terminal non-success report
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("job {}", self.status.as_str()))
    }
}

/// Optional generation parameters forwarded to the media service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Lifecycle of a chat-inline media job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaJobStatus {
    Pending,
    Completed,
    Failed,
}

/// A detached job whose result lands in the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaJob {
    pub id: String,
    pub kind: MediaKind,
    pub prompt: String,
    pub model_id: String,
    /// Transcript turn replaced when the job resolves
    pub placeholder_turn_id: String,
    pub status: MediaJobStatus,
    #[serde(default)]
    pub result: Vec<MediaLocator>,
}

/// Entry on the creative studio board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioJob {
    pub id: String,
    pub kind: MediaKind,
    pub prompt: String,
    pub model_id: String,
    pub status: RemoteJobStatus,
    #[serde(default)]
    pub result: Vec<MediaLocator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudioJob {
    pub fn new(
        id: impl Into<String>,
        kind: MediaKind,
        prompt: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            prompt: prompt.into(),
            model_id: model_id.into(),
            status: RemoteJobStatus::Queued,
            result: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
