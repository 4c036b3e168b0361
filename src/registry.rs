//! Model registry: id → display info, context size, kind

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What a model produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Chat,
    Image,
    Video,
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::Chat
    }
}

/// Registry entry for one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub provider_icon: Option<String>,
    pub max_context_tokens: usize,
    #[serde(default)]
    pub kind: ModelKind,
}

impl ModelInfo {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        max_context_tokens: usize,
        kind: ModelKind,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            provider_icon: None,
            max_context_tokens,
            kind,
        }
    }
}

/// Lookup of model metadata
pub trait ModelRegistry: Send + Sync {
    fn lookup(&self, model_id: &str) -> Option<ModelInfo>;
}

/// In-memory registry that keeps models in configuration order
#[derive(Debug, Clone, Default)]
pub struct StaticModelRegistry {
    models: IndexMap<String, ModelInfo>,
}

impl StaticModelRegistry {
    pub fn new(models: impl IntoIterator<Item = ModelInfo>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn insert(&mut self, model: ModelInfo) {
        self.models.insert(model.id.clone(), model);
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelInfo> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl ModelRegistry for StaticModelRegistry {
    fn lookup(&self, model_id: &str) -> Option<ModelInfo> {
        self.models.get(model_id).cloned()
    }
}
