//! Synopsis generation for turns dropped by the compactor

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::models::ContextTurn;

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize a prefix of conversation turns into a concise synopsis
    async fn summarize(
        &self,
        turns: &[ContextTurn],
        max_tokens: usize,
    ) -> Result<String, SummarizerError>;
}

/// Configuration for the LLM summarizer
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizerConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_endpoint() -> String { "http://localhost:8080/v1/chat/completions".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_max_retries() -> usize { 3 }
fn default_retry_backoff_ms() -> u64 { 100 }

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl SummarizerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// LLM-based summarizer using an OpenAI-compatible API
pub struct LLMSummarizer {
    client: Client,
    config: SummarizerConfig,
}

impl LLMSummarizer {
    pub fn new(config: SummarizerConfig) -> Result<Self, SummarizerError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SummarizerError::InitializationError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn build_prompt(&self, turns: &[ContextTurn], max_tokens: usize) -> String {
        let transcript = turns
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "Summarize the earlier part of this conversation so it can replace the original turns. \
            Keep names, decisions, facts the user stated, and open questions. \
            Keep the summary under {} tokens.\n\n{}",
            max_tokens, transcript
        )
    }
}

#[async_trait]
impl Summarizer for LLMSummarizer {
    async fn summarize(
        &self,
        turns: &[ContextTurn],
        max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        if turns.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} turns, target: {} tokens", turns.len(), max_tokens);

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a concise summarizer of chat transcripts.".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: self.build_prompt(turns, max_tokens),
                },
            ],
            max_tokens: Some(max_tokens),
            temperature: Some(0.3),
        };

        let mut last_error = None;
        for attempt in 0..self.config.max_retries.max(1) {
            if attempt > 0 {
                debug!("Retry attempt {} for summarization", attempt);
                tokio::time::sleep(self.config.retry_backoff() * (1u32 << attempt.min(16))).await;
            }

            let mut req = self.client.post(&self.config.endpoint).json(&request);
            if let Some(api_key) = &self.config.api_key {
                req = req.bearer_auth(api_key.expose_secret());
            }

            let response = match req.send().await {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(SummarizerError::NetworkError(e.to_string()));
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                last_error = Some(SummarizerError::ApiError(format!("HTTP {}: {}", status, body)));
                continue;
            }

            match response.json::<ChatCompletionResponse>().await {
                Ok(resp) => match resp.choices.into_iter().next() {
                    Some(choice) => return Ok(choice.message.content),
                    None => {
                        last_error = Some(SummarizerError::ApiError(
                            "No choices in response".to_string(),
                        ));
                    }
                },
                Err(e) => {
                    last_error = Some(SummarizerError::ApiError(format!(
                        "Failed to parse response: {}",
                        e
                    )));
                }
            }
        }

        warn!("Summarization failed after {} attempts", self.config.max_retries.max(1));
        Err(last_error.unwrap_or(SummarizerError::Unknown))
    }
}

/// Offline fallback that concatenates the dropped turns
#[derive(Debug, Default)]
pub struct ConcatenationSummarizer;

#[async_trait]
impl Summarizer for ConcatenationSummarizer {
    async fn summarize(
        &self,
        turns: &[ContextTurn],
        _max_tokens: usize,
    ) -> Result<String, SummarizerError> {
        Ok(turns
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.text))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unknown error")]
    Unknown,
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_turns() -> Vec<ContextTurn> {
        vec![ContextTurn::user("Hello"), ContextTurn::assistant("World")]
    }

    #[tokio::test]
    async fn test_concatenation_summarizer() {
        let result = ConcatenationSummarizer
            .summarize(&sample_turns(), 100)
            .await
            .unwrap();
        assert_eq!(result, "user: Hello\nassistant: World");
    }

    #[test]
    fn test_summarizer_config_default() {
        let config = SummarizerConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn test_llm_summarizer_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer secret-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"A short brief"}}]}"#)
            .create_async()
            .await;

        let summarizer = LLMSummarizer::new(SummarizerConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            api_key: Some(SecretString::new("secret-key".to_string())),
            ..Default::default()
        })
        .unwrap();

        let summary = summarizer.summarize(&sample_turns(), 200).await.unwrap();
        assert_eq!(summary, "A short brief");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_llm_summarizer_reports_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let summarizer = LLMSummarizer::new(SummarizerConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            max_retries: 1,
            ..Default::default()
        })
        .unwrap();

        let result = summarizer.summarize(&sample_turns(), 200).await;
        assert!(matches!(result, Err(SummarizerError::ApiError(_))));
    }
}
