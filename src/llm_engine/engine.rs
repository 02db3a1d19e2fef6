//! LLM Engine - manages the registered LLM providers
//!
//! Handles provider selection and hands the active provider to translation runs

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::PipelineConfig;
use crate::llm_engine::provider::{LlmError, LlmProvider, ProviderType};
use crate::llm_engine::providers::{OllamaProvider, OpenAiProvider};

/// The main LLM engine that manages providers
pub struct LlmEngine {
    /// All registered providers
    providers: HashMap<ProviderType, Arc<dyn LlmProvider>>,
    /// Currently active provider
    active_provider: Arc<RwLock<Option<ProviderType>>>,
}

impl LlmEngine {
    /// An engine with no providers registered
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
            active_provider: Arc::new(RwLock::new(None)),
        }
    }

    /// Register the Ollama and OpenAI providers from configuration and activate
    /// the one translation is configured to use
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut engine = Self::empty();
        engine.register(ProviderType::Ollama, Arc::new(OllamaProvider::new(&config.ollama)));
        engine.register(ProviderType::OpenAi, Arc::new(OpenAiProvider::new(&config.openai)));
        engine.active_provider = Arc::new(RwLock::new(Some(config.translation.provider)));
        engine
    }

    /// Register (or replace) a provider
    pub fn register(&mut self, provider_type: ProviderType, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider_type, provider);
    }

    /// Get the active provider type
    pub async fn active_provider_type(&self) -> Option<ProviderType> {
        *self.active_provider.read().await
    }

    /// Set the active provider
    pub async fn set_active_provider(&self, provider_type: ProviderType) -> Result<(), LlmError> {
        if !self.providers.contains_key(&provider_type) {
            return Err(LlmError::ProviderUnavailable(format!(
                "Provider {:?} not registered",
                provider_type
            )));
        }

        *self.active_provider.write().await = Some(provider_type);
        Ok(())
    }

    /// Get the active provider
    pub async fn active_provider(&self) -> Result<Arc<dyn LlmProvider>, LlmError> {
        let provider_type = self
            .active_provider
            .read()
            .await
            .ok_or(LlmError::NotInitialized)?;

        self.providers
            .get(&provider_type)
            .cloned()
            .ok_or(LlmError::NotInitialized)
    }

    /// Shutdown every provider
    pub async fn shutdown(&self) -> Result<(), LlmError> {
        for provider in self.providers.values() {
            provider.shutdown().await?;
        }
        *self.active_provider.write().await = None;
        Ok(())
    }
}
