//! Chat backend interface for translation runs
//!
//! A provider turns a system + user prompt into text. Translation only needs
//! that single round trip; model selection happens once before a run starts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures at the provider boundary. Every variant is retryable from the
/// translator's point of view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LlmError {
    ModelNotFound(String),
    /// Server not reachable (Ollama not running, DNS, refused connection)
    ProviderUnavailable(String),
    AuthenticationFailed(String),
    /// Transport failure or a non-success status
    RequestFailed(String),
    /// Rejected by the server as malformed
    InvalidRequest(String),
    /// The server answered but the body was unusable
    InferenceFailed(String),
    /// No model selected yet
    NotInitialized,
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            LlmError::ProviderUnavailable(msg) => write!(f, "Provider unavailable: {}", msg),
            LlmError::AuthenticationFailed(msg) => write!(f, "Authentication failed: {}", msg),
            LlmError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            LlmError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            LlmError::InferenceFailed(msg) => write!(f, "Inference failed: {}", msg),
            LlmError::NotInitialized => write!(f, "No model selected"),
        }
    }
}

impl std::error::Error for LlmError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
}

impl MessageRole {
    /// Wire name shared by the Ollama and OpenAI chat APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }
}

/// One chat round trip. Sampling fields left as `None` use the server default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    /// Low temperature: subtitles should read the same on a retry
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            stop: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    /// Model that actually answered, as reported by the server
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub finish_reason: Option<String>,
}

/// A model a provider can translate with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModelInfo {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub size_bytes: Option<u64>,
    pub is_local: bool,
    /// Currently selected for requests
    pub is_loaded: bool,
    pub context_length: Option<u32>,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderCapabilities {
    pub chat: bool,
    /// Served from this machine
    pub local: bool,
    pub requires_api_key: bool,
    /// Small context window: oversized chunks are refused before sending
    pub short_context: bool,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short lowercase name used in logs and error messages
    fn provider_name(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities;

    async fn list_models(&self) -> Result<Vec<LlmModelInfo>, LlmError>;

    /// Reachable with a model selected
    async fn is_ready(&self) -> bool;

    /// Select the model later requests go to
    async fn initialize(&self, model_id: &str) -> Result<(), LlmError>;

    async fn current_model(&self) -> Option<String>;

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Send `messages` with default sampling and return the reply text
    async fn chat(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        let response = self.complete(CompletionRequest::new(messages)).await?;
        Ok(response.content)
    }

    async fn shutdown(&self) -> Result<(), LlmError>;
}

/// Which backend a translation run talks to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    #[default]
    Ollama,
    OpenAi,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderType::Ollama => write!(f, "Ollama"),
            ProviderType::OpenAi => write!(f, "OpenAI"),
        }
    }
}
