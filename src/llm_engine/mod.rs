//! LLM Engine module for transcript translation
//!
//! Supports two backends:
//! - Ollama API (local server, short context)
//! - OpenAI-compatible APIs (hosted, long context)

pub mod provider;
pub mod engine;
pub mod providers;

pub use provider::{
    LlmProvider, LlmError, LlmModelInfo, ProviderCapabilities, ProviderType,
    CompletionRequest, CompletionResponse, Message, MessageRole,
};
pub use engine::LlmEngine;
