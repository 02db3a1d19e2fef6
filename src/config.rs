//! Pipeline configuration
//!
//! Stored as one JSON document under the `pipeline_config` settings key.
//! Every section falls back to its defaults, so a partial document is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::database::DatabaseManager;
use crate::llm_engine::ProviderType;

/// Settings key holding the serialized configuration
pub const PIPELINE_CONFIG_KEY: &str = "pipeline_config";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub worker: WorkerConfig,
    pub sink: SinkPolicy,
    pub progress: ProgressPolicy,
    pub chunking: ChunkingConfig,
    pub translation: TranslationConfig,
    pub storage: StorageConfig,
    pub ollama: OllamaSettings,
    pub openai: OpenAiSettings,
}

/// How the external speech-recognition worker is launched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interpreter or binary to execute
    pub program: String,
    /// Arguments placed before the `--server` flag (usually the script path)
    pub args: Vec<String>,
    /// Extra environment for the worker process
    pub env: HashMap<String, String>,
    /// Environment variables copied from our own environment when set
    pub env_passthrough: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["python/worker.py".to_string()],
            env: HashMap::new(),
            env_passthrough: vec![
                "WHISPER_DEVICE".to_string(),
                "WHISPER_COMPUTE_TYPE".to_string(),
            ],
        }
    }
}

/// Flush throttle for streamed transcript segments
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkPolicy {
    pub max_buffered: usize,
    pub max_interval_ms: u64,
}

impl Default for SinkPolicy {
    fn default() -> Self {
        Self {
            max_buffered: 5,
            max_interval_ms: 2000,
        }
    }
}

/// Write throttle for progress percentages
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressPolicy {
    pub min_delta: f64,
    pub min_interval_ms: u64,
}

impl Default for ProgressPolicy {
    fn default() -> Self {
        Self {
            min_delta: 2.0,
            min_interval_ms: 1000,
        }
    }
}

/// Token budgets for splitting a transcript into translation chunks
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_tokens: usize,
    pub overlap_tokens: usize,
    pub max_context_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: 1200,
            overlap_tokens: 200,
            max_context_tokens: 1600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    /// Retries per chunk after the first attempt
    pub max_retries: u32,
    /// Base delay between attempts, multiplied by the attempt number
    pub retry_delay_ms: u64,
    /// Character limit for one compressed chunk on short-context providers
    pub short_context_char_guard: usize,
    pub target_language: String,
    /// Provider translation runs go to unless a job names one
    pub provider: ProviderType,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 1000,
            short_context_char_guard: 4000,
            target_language: "Chinese".to_string(),
            provider: ProviderType::Ollama,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    /// Explicit ffmpeg binary; looked up on PATH when unset
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("matchscribe"),
            ffmpeg_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: None,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            model: None,
            timeout_secs: 300,
        }
    }
}

impl DatabaseManager {
    /// Load the pipeline configuration from the settings table, falling back
    /// to defaults when none was stored
    pub fn load_pipeline_config(&self) -> Result<PipelineConfig> {
        match self.get_setting(PIPELINE_CONFIG_KEY)? {
            Some(raw) => serde_json::from_str(&raw).context("Failed to parse pipeline config"),
            None => {
                log::info!("No stored pipeline config, using defaults");
                Ok(PipelineConfig::default())
            }
        }
    }

    pub fn save_pipeline_config(&self, config: &PipelineConfig) -> Result<()> {
        let raw = serde_json::to_string(config).context("Failed to serialize pipeline config")?;
        self.set_setting(PIPELINE_CONFIG_KEY, &raw, "json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"chunking": {"chunk_tokens": 10}}"#).unwrap();
        assert_eq!(config.chunking.chunk_tokens, 10);
        assert_eq!(config.chunking.overlap_tokens, 200);
        assert_eq!(config.sink.max_buffered, 5);
        assert_eq!(config.translation.max_retries, 2);
        assert_eq!(config.translation.short_context_char_guard, 4000);
        assert_eq!(config.translation.provider, ProviderType::Ollama);
    }

    #[test]
    fn test_load_and_save_through_settings() {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();

        let loaded = db.load_pipeline_config().unwrap();
        assert_eq!(loaded.progress.min_interval_ms, 1000);

        let mut config = PipelineConfig::default();
        config.worker.program = "/opt/venv/bin/python".to_string();
        config.translation.provider = ProviderType::OpenAi;
        db.save_pipeline_config(&config).unwrap();

        let reloaded = db.load_pipeline_config().unwrap();
        assert_eq!(reloaded.worker.program, "/opt/venv/bin/python");
        assert_eq!(reloaded.translation.provider, ProviderType::OpenAi);
    }
}
