//! Engine configuration
//!
//! Loaded from an optional TOML file layered with `CHAT_ENGINE__*`
//! environment variables, e.g. `CHAT_ENGINE__SESSION__REVEAL_TICK_MS=15`.

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::context::compactor::CompactionConfig;
use crate::context::summarizer::{ConcatenationSummarizer, LLMSummarizer, Summarizer, SummarizerConfig};
use crate::context::token_budget::TokenBudgetConfig;
use crate::error::{ChatError, Result};
use crate::logging::LoggingConfig;
use crate::media::dispatch::{HttpMediaDispatch, MediaDispatch, MediaDispatchConfig};
use crate::media::studio::StudioPollConfig;
use crate::media::tracker::MediaPollConfig;
use crate::registry::{ModelInfo, ModelKind, StaticModelRegistry};
use crate::session::controller::SessionConfig;

const ENV_PREFIX: &str = "CHAT_ENGINE";

/// Aggregate engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub budget: TokenBudgetConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Chat-inline media job polling
    #[serde(default)]
    pub media: MediaPollConfig,
    #[serde(default)]
    pub studio: StudioPollConfig,
    #[serde(default)]
    pub dispatch: MediaDispatchConfig,
    /// LLM summarizer; the offline concatenation summarizer is used when absent
    #[serde(default)]
    pub summarizer: Option<SummarizerConfig>,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default = "default_model")]
    pub default_model: String,
}

fn default_model() -> String { "gpt-4o".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            budget: TokenBudgetConfig::default(),
            compaction: CompactionConfig::default(),
            session: SessionConfig::default(),
            media: MediaPollConfig::default(),
            studio: StudioPollConfig::default(),
            dispatch: MediaDispatchConfig::default(),
            summarizer: None,
            models: vec![ModelInfo::new("gpt-4o", "GPT-4o", 128_000, ModelKind::Chat)],
            default_model: default_model(),
        }
    }
}

impl Config {
    /// Load from `.env`, an optional file and the environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from_str(toml, ::config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(ChatError::Configuration("No models configured".to_string()));
        }

        match self.models.iter().find(|m| m.id == self.default_model) {
            Some(model) if model.kind == ModelKind::Chat => {}
            Some(_) => {
                return Err(ChatError::Configuration(format!(
                    "Default model {} is not a chat model",
                    self.default_model
                )))
            }
            None => return Err(ChatError::UnknownModel(self.default_model.clone())),
        }

        for model in self.models.iter().filter(|m| m.kind == ModelKind::Chat) {
            self.budget.validate_for(model)?;
        }

        if self.compaction.tokens_per_word <= 0.0 {
            return Err(ChatError::Configuration(
                "compaction.tokens_per_word must be positive".to_string(),
            ));
        }
        if self.session.chars_per_tick == 0 {
            return Err(ChatError::Configuration(
                "session.chars_per_tick must be at least 1".to_string(),
            ));
        }
        if self.media.max_status_errors == 0 || self.studio.max_status_errors == 0 {
            return Err(ChatError::Configuration(
                "max_status_errors must be at least 1".to_string(),
            ));
        }
        if !self.studio.backoff_factor.is_finite() || self.studio.backoff_factor < 1.0 {
            return Err(ChatError::Configuration(
                "studio.backoff_factor must be finite and at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn registry(&self) -> StaticModelRegistry {
        StaticModelRegistry::new(self.models.iter().cloned())
    }

    pub fn summarizer(&self) -> Result<Arc<dyn Summarizer>> {
        match &self.summarizer {
            Some(config) => Ok(Arc::new(LLMSummarizer::new(config.clone())?)),
            None => Ok(Arc::new(ConcatenationSummarizer)),
        }
    }

    pub fn media_dispatch(&self) -> Result<Arc<dyn MediaDispatch>> {
        Ok(Arc::new(HttpMediaDispatch::new(self.dispatch.clone())?))
    }
}
