//! Ollama chat backend (`/api/chat`, default localhost:11434)
//!
//! Models pulled into a local Ollama usually run with a small context window,
//! so this provider reports `short_context` and the translator refuses chunks
//! that would not fit.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::OllamaSettings;
use crate::llm_engine::provider::{
    CompletionRequest, CompletionResponse, LlmError, LlmModelInfo, LlmProvider,
    Message, ProviderCapabilities,
};

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: SamplingOptions,
}

/// Sampling overrides; absent fields keep the model's Modelfile defaults
#[derive(Debug, Default, Serialize)]
struct SamplingOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: OllamaMessage,
    model: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Tags {
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    details: Option<TagDetails>,
}

#[derive(Debug, Deserialize)]
struct TagDetails {
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    parameter_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Version {
    version: String,
}

fn model_info(entry: TagEntry, selected: Option<&str>) -> LlmModelInfo {
    let description = entry.details.map(|d| {
        [d.family, d.parameter_size]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    });

    LlmModelInfo {
        is_loaded: selected == Some(entry.name.as_str()),
        id: entry.name.clone(),
        name: entry.name,
        description: description.filter(|d| !d.is_empty()),
        size_bytes: Some(entry.size),
        is_local: true,
        context_length: None,
        provider: "ollama".to_string(),
    }
}

/// Map a non-success `/api/chat` status; Ollama answers 404 for unpulled models
fn chat_status_error(status: StatusCode, model: &str, body: &str) -> LlmError {
    match status {
        StatusCode::NOT_FOUND => LlmError::ModelNotFound(format!("{} (pull it with `ollama pull {}`)", model, model)),
        StatusCode::BAD_REQUEST => LlmError::InvalidRequest(body.to_string()),
        _ => LlmError::RequestFailed(format!("Ollama returned {}: {}", status, body)),
    }
}

pub struct OllamaProvider {
    base_url: String,
    client: Client,
    current_model: Arc<RwLock<Option<String>>>,
}

impl OllamaProvider {
    pub fn new(settings: &OllamaSettings) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Failed to build Ollama HTTP client ({}), using defaults", e);
                Client::new()
            });

        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            client,
            current_model: Arc::new(RwLock::new(settings.model.clone())),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, LlmError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| LlmError::ProviderUnavailable(format!("Cannot connect to Ollama at {}: {}", self.base_url, e)))?;

        if !response.status().is_success() {
            return Err(LlmError::RequestFailed(format!("GET {} returned {}", path, response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InferenceFailed(format!("Unexpected {} body: {}", path, e)))
    }

    /// Server version, doubling as a reachability check
    pub async fn version(&self) -> Result<String, LlmError> {
        self.get_json::<Version>("/api/version").await.map(|v| v.version)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            chat: true,
            local: true,
            requires_api_key: false,
            short_context: true,
        }
    }

    async fn list_models(&self) -> Result<Vec<LlmModelInfo>, LlmError> {
        let tags: Tags = self.get_json("/api/tags").await?;
        let selected = self.current_model.read().await.clone();

        Ok(tags
            .models
            .into_iter()
            .map(|entry| model_info(entry, selected.as_deref()))
            .collect())
    }

    async fn is_ready(&self) -> bool {
        self.current_model.read().await.is_some() && self.version().await.is_ok()
    }

    async fn initialize(&self, model_id: &str) -> Result<(), LlmError> {
        let models = self.list_models().await?;
        if !models.iter().any(|m| m.id == model_id) {
            let pulled: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
            return Err(LlmError::ModelNotFound(format!("{} (pulled: {})", model_id, pulled.join(", "))));
        }

        *self.current_model.write().await = Some(model_id.to_string());
        log::info!("Ollama translating with {}", model_id);
        Ok(())
    }

    async fn current_model(&self) -> Option<String> {
        self.current_model.read().await.clone()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let model = self.current_model().await.ok_or(LlmError::NotInitialized)?;

        let body = ChatBody {
            model: model.clone(),
            messages: request.messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: SamplingOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens,
                stop: request.stop,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(chat_status_error(status, &model, &text));
        }

        let reply: ChatReply = response
            .json()
            .await
            .map_err(|e| LlmError::InferenceFailed(format!("Unexpected /api/chat body: {}", e)))?;

        Ok(CompletionResponse {
            content: reply.message.content,
            model: reply.model,
            prompt_tokens: reply.prompt_eval_count,
            completion_tokens: reply.eval_count,
            finish_reason: reply.done_reason,
        })
    }

    async fn shutdown(&self) -> Result<(), LlmError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_body_omits_unset_sampling() {
        let body = ChatBody {
            model: "qwen3:14b".to_string(),
            messages: vec![OllamaMessage::from(&Message::system("rules")), OllamaMessage::from(&Message::user("[1]\thi"))],
            stream: false,
            options: SamplingOptions { temperature: Some(0.2), ..SamplingOptions::default() },
        };

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "[1]\thi");
        assert!(value["options"].get("top_p").is_none());
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_tags_become_model_infos() {
        let tags: Tags = serde_json::from_str(
            r#"{"models":[
                {"name":"qwen2.5:7b","size":4683087332,"details":{"family":"qwen2","parameter_size":"7.6B"}},
                {"name":"llama3.1:8b"}
            ]}"#,
        )
        .unwrap();

        let infos: Vec<LlmModelInfo> = tags.models.into_iter().map(|m| model_info(m, Some("llama3.1:8b"))).collect();
        assert_eq!(infos[0].description.as_deref(), Some("qwen2 7.6B"));
        assert!(!infos[0].is_loaded);
        assert_eq!(infos[1].description, None);
        assert!(infos[1].is_loaded);
    }

    #[test]
    fn test_unpulled_model_maps_to_model_not_found() {
        assert!(matches!(
            chat_status_error(StatusCode::NOT_FOUND, "qwen3:14b", "model not found"),
            LlmError::ModelNotFound(_)
        ));
        assert!(matches!(
            chat_status_error(StatusCode::INTERNAL_SERVER_ERROR, "qwen3:14b", "oom"),
            LlmError::RequestFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_configured_model_is_selected() {
        let settings = OllamaSettings {
            model: Some("qwen3:14b".to_string()),
            ..OllamaSettings::default()
        };
        let provider = OllamaProvider::new(&settings);
        assert_eq!(provider.current_model().await.as_deref(), Some("qwen3:14b"));
        assert!(provider.capabilities().short_context);
    }
}
