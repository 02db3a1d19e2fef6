//! LLM Provider implementations
//!
//! Each provider implements the LlmProvider trait for a specific backend

pub mod ollama_provider;
pub mod openai_provider;

pub use ollama_provider::OllamaProvider;
pub use openai_provider::OpenAiProvider;
