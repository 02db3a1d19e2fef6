//! OpenAI-compatible chat provider
//!
//! Talks to any server exposing `/v1/chat/completions` (OpenAI, DeepSeek,
//! vLLM, LM Studio). Hosted models have long context windows.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::OpenAiSettings;
use crate::llm_engine::provider::{
    CompletionRequest, CompletionResponse, LlmError, LlmModelInfo, LlmProvider,
    Message, ProviderCapabilities,
};

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    owned_by: Option<String>,
}

pub struct OpenAiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
    current_model: Arc<RwLock<Option<String>>>,
}

impl OpenAiProvider {
    pub fn new(settings: &OpenAiSettings) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build OpenAI HTTP client ({}), using defaults", e);
                Client::new()
            });

        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
            client,
            current_model: Arc::new(RwLock::new(settings.model.clone())),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        // Accept base URLs with or without the /v1 suffix
        if self.base_url.ends_with("/v1") {
            format!("{}/{}", self.base_url, path)
        } else {
            format!("{}/v1/{}", self.base_url, path)
        }
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key.as_deref()
            .ok_or_else(|| LlmError::AuthenticationFailed("No API key configured".to_string()))
    }
}

fn status_error(status: StatusCode, body: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthenticationFailed(body),
        StatusCode::NOT_FOUND => LlmError::ModelNotFound(body),
        StatusCode::BAD_REQUEST => LlmError::InvalidRequest(body),
        _ => LlmError::RequestFailed(format!("HTTP {}: {}", status, body)),
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            chat: true,
            local: false,
            requires_api_key: true,
            short_context: false,
        }
    }

    async fn list_models(&self) -> Result<Vec<LlmModelInfo>, LlmError> {
        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(self.api_key()?)
            .send()
            .await
            .map_err(|e| LlmError::ProviderUnavailable(format!("Cannot reach API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Invalid response: {}", e)))?;

        let current = self.current_model.read().await;

        Ok(list
            .data
            .into_iter()
            .map(|m| LlmModelInfo {
                is_loaded: current.as_ref() == Some(&m.id),
                name: m.id.clone(),
                id: m.id,
                description: m.owned_by,
                size_bytes: None,
                is_local: false,
                context_length: None,
                provider: "openai".to_string(),
            })
            .collect())
    }

    async fn is_ready(&self) -> bool {
        self.api_key.is_some() && self.current_model.read().await.is_some()
    }

    async fn initialize(&self, model_id: &str) -> Result<(), LlmError> {
        self.api_key()?;
        *self.current_model.write().await = Some(model_id.to_string());
        log::info!("OpenAI provider initialized with model: {}", model_id);
        Ok(())
    }

    async fn current_model(&self) -> Option<String> {
        self.current_model.read().await.clone()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = self
            .current_model
            .read()
            .await
            .clone()
            .ok_or(LlmError::NotInitialized)?;

        let chat_request = ChatRequest {
            model: model.clone(),
            messages: request.messages.iter().map(ChatMessage::from).collect(),
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
            stop: request.stop,
        };

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.api_key()?)
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::RequestFailed(format!("Invalid response: {}", e)))?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InferenceFailed("Response has no choices".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content,
            model: if chat_response.model.is_empty() { model } else { chat_response.model },
            prompt_tokens: chat_response.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: chat_response.usage.as_ref().and_then(|u| u.completion_tokens),
            finish_reason: choice.finish_reason,
        })
    }

    async fn shutdown(&self) -> Result<(), LlmError> {
        log::info!("OpenAI provider shut down");
        Ok(())
    }
}
