//! Chunked transcript translation with retry and persisted run progress

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::{ChunkingConfig, TranslationConfig};
use crate::database::{DatabaseManager, TranscriptSegment, TranslatedSegment, TranslationStatus};
use crate::error::TranslationError;
use crate::llm_engine::{LlmProvider, Message};

use super::chunker::{plan_chunks, ChunkPlan};
use super::codec;

/// Identifies one translation run and what it translates into
#[derive(Debug, Clone)]
pub struct TranslationRequest {
    pub run_id: String,
    pub source_job_id: String,
    pub target_language: String,
}

pub struct Translator {
    db: Arc<DatabaseManager>,
    provider: Arc<dyn LlmProvider>,
    chunking: ChunkingConfig,
    settings: TranslationConfig,
}

fn system_prompt(target_language: &str) -> String {
    format!(
        "You are a professional subtitle translator for live sports commentary. \
         Translate each line into {target}.\n\
         Rules:\n\
         - Every input line has the form [ID]<TAB>text. Output exactly one line per input line, \
           in the same order, as [ID]<TAB>translation.\n\
         - Keep every [ID] unchanged. Never merge, split, drop or renumber lines.\n\
         - Lines under \"Context\" are already translated; use them for continuity only and do not output them.\n\
         - Keep player and team names consistent with the context.\n\
         - Output only the translated lines, with no explanations.",
        target = target_language
    )
}

fn user_prompt(context: &str, compressed: &str) -> String {
    if context.is_empty() {
        format!("Translate:\n{}", compressed)
    } else {
        format!("Context:\n{}\n\nTranslate:\n{}", context, compressed)
    }
}

fn progress_pct(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((completed as f64 * 100.0) / total as f64).round() as u32
}

impl Translator {
    pub fn new(
        db: Arc<DatabaseManager>,
        provider: Arc<dyn LlmProvider>,
        chunking: ChunkingConfig,
        settings: TranslationConfig,
    ) -> Self {
        Self { db, provider, chunking, settings }
    }

    /// Translate `segments` and persist the run. On failure the run is left in
    /// `error` (or `cancelled`) with progress frozen at the last finished chunk.
    pub async fn translate(
        &self,
        request: &TranslationRequest,
        segments: &[TranscriptSegment],
        token: &CancellationToken,
    ) -> Result<Vec<TranslatedSegment>, TranslationError> {
        let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        let plans = plan_chunks(&texts, &self.chunking);

        self.db.start_translation_run(
            &request.run_id,
            &request.source_job_id,
            &request.target_language,
            Some(self.provider.provider_name()),
            plans.len() as u32,
        )?;

        log::info!(
            "Translation run {}: {} segments in {} chunks via {}",
            request.run_id,
            segments.len(),
            plans.len(),
            self.provider.provider_name()
        );

        match self.translate_chunks(request, &texts, &plans, token).await {
            Ok(translations) => {
                let merged: Vec<TranslatedSegment> = segments
                    .iter()
                    .zip(translations)
                    .map(|(segment, text)| TranslatedSegment {
                        start: segment.start_time,
                        end: segment.end_time,
                        text: text.unwrap_or_else(|| segment.text.clone()),
                        original: segment.text.clone(),
                    })
                    .collect();

                let content = serde_json::to_string(&merged)
                    .map_err(|e| TranslationError::Store(e.into()))?;
                self.db.complete_translation_run(&request.run_id, &content)?;
                log::info!("Translation run {} completed", request.run_id);
                Ok(merged)
            }
            Err(err) => {
                let status = if matches!(err, TranslationError::Cancelled) {
                    TranslationStatus::Cancelled
                } else {
                    TranslationStatus::Error
                };
                log::error!("Translation run {} stopped: {}", request.run_id, err);
                if let Err(e) = self.db.fail_translation_run(&request.run_id, status, &err.to_string()) {
                    log::warn!("Failed to record translation failure for {}: {}", request.run_id, e);
                }
                Err(err)
            }
        }
    }

    async fn translate_chunks(
        &self,
        request: &TranslationRequest,
        texts: &[&str],
        plans: &[ChunkPlan],
        token: &CancellationToken,
    ) -> Result<Vec<Option<String>>, TranslationError> {
        let mut translations: Vec<Option<String>> = vec![None; texts.len()];
        let system = system_prompt(&request.target_language);
        let capabilities = self.provider.capabilities();

        for (index, plan) in plans.iter().enumerate() {
            if token.is_cancelled() {
                return Err(TranslationError::Cancelled);
            }

            let compressed = codec::compress(texts, plan.range());
            let chars = compressed.chars().count();
            if capabilities.short_context && chars > self.settings.short_context_char_guard {
                return Err(TranslationError::ContextTooLong {
                    chars,
                    limit: self.settings.short_context_char_guard,
                    provider: self.provider.provider_name().to_string(),
                });
            }

            let context = plan
                .overlap
                .clone()
                .map(|overlap| codec::context_block(texts, &translations, overlap))
                .unwrap_or_default();

            let reply = self
                .complete_with_retry(index, &system, &user_prompt(&context, &compressed), token)
                .await?;

            let parsed = codec::parse_reply(&reply, &plan.range());
            if parsed.len() < plan.segment_count() {
                log::warn!(
                    "Chunk {} of run {}: {} of {} lines missing, keeping source text",
                    index + 1,
                    request.run_id,
                    plan.segment_count() - parsed.len(),
                    plan.segment_count()
                );
            }

            for (i, text) in codec::merge(texts, &parsed, plan.range()) {
                translations[i] = Some(text);
            }

            let completed = index + 1;
            self.db.update_translation_progress(
                &request.run_id,
                completed as u32,
                progress_pct(completed, plans.len()),
            )?;
            crate::perf_debug!("Run {} chunk {}/{} done", request.run_id, completed, plans.len());
        }

        Ok(translations)
    }

    /// One chat call per attempt, `max_retries + 1` attempts, each raced
    /// against the cancellation token. The delay grows linearly per attempt.
    async fn complete_with_retry(
        &self,
        chunk: usize,
        system: &str,
        user: &str,
        token: &CancellationToken,
    ) -> Result<String, TranslationError> {
        let attempts = self.settings.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let messages = vec![Message::system(system), Message::user(user)];

            let result = tokio::select! {
                _ = token.cancelled() => return Err(TranslationError::Cancelled),
                result = self.provider.chat(messages) => result,
            };

            match result {
                Ok(content) => return Ok(content),
                Err(e) => {
                    log::warn!("Chunk {} attempt {}/{} failed: {}", chunk + 1, attempt, attempts, e);
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                let delay = Duration::from_millis(self.settings.retry_delay_ms * attempt as u64);
                tokio::select! {
                    _ = token.cancelled() => return Err(TranslationError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(TranslationError::ChunkFailed {
            chunk: chunk + 1,
            attempts,
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::{
        CompletionRequest, CompletionResponse, LlmError, LlmModelInfo, ProviderCapabilities,
    };
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Echoes the chunk back, uppercased, after a scripted list of failures
    struct ScriptedProvider {
        failures: Mutex<VecDeque<bool>>,
        short_context: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(failures: &[bool], short_context: bool) -> Self {
            Self {
                failures: Mutex::new(failures.iter().copied().collect()),
                short_context,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn provider_name(&self) -> &'static str {
            "scripted"
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                chat: true,
                local: true,
                requires_api_key: false,
                short_context: self.short_context,
            }
        }

        async fn list_models(&self) -> Result<Vec<LlmModelInfo>, LlmError> {
            Ok(Vec::new())
        }

        async fn is_ready(&self) -> bool {
            true
        }

        async fn initialize(&self, _model_id: &str) -> Result<(), LlmError> {
            Ok(())
        }

        async fn current_model(&self) -> Option<String> {
            Some("scripted".to_string())
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let user = request.messages.last().map(|m: &Message| m.content.clone()).unwrap_or_default();
            self.calls.lock().unwrap().push(user.clone());

            // `true` = fail this call; once the script runs out, always fail
            let fail = self.failures.lock().unwrap().pop_front().unwrap_or(true);
            if fail {
                return Err(LlmError::RequestFailed("connection reset".to_string()));
            }

            let body = user.rsplit("Translate:\n").next().unwrap_or_default();
            Ok(CompletionResponse {
                content: body.to_uppercase(),
                model: "scripted".to_string(),
                prompt_tokens: None,
                completion_tokens: None,
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn shutdown(&self) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn setup_db() -> (TempDir, Arc<DatabaseManager>) {
        let dir = tempfile::tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();
        (dir, Arc::new(db))
    }

    fn segments(texts: &[&str]) -> Vec<TranscriptSegment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TranscriptSegment {
                segment_index: i as u32,
                start_time: i as f64,
                end_time: i as f64 + 1.0,
                text: t.to_string(),
            })
            .collect()
    }

    fn translator(db: Arc<DatabaseManager>, provider: Arc<ScriptedProvider>, chunk_tokens: usize) -> Translator {
        Translator::new(
            db,
            provider,
            ChunkingConfig {
                chunk_tokens,
                overlap_tokens: chunk_tokens,
                max_context_tokens: chunk_tokens * 2,
            },
            TranslationConfig {
                retry_delay_ms: 1,
                ..TranslationConfig::default()
            },
        )
    }

    fn request() -> TranslationRequest {
        TranslationRequest {
            run_id: "run-1".to_string(),
            source_job_id: "job-1".to_string(),
            target_language: "Chinese".to_string(),
        }
    }

    #[tokio::test]
    async fn test_two_failures_then_success_completes() {
        let (_dir, db) = setup_db();
        let provider = Arc::new(ScriptedProvider::new(&[true, true, false], false));
        let translator = translator(db.clone(), provider.clone(), 100);

        let token = CancellationToken::new();
        let merged = translator
            .translate(&request(), &segments(&["kick off", "goal"]), &token)
            .await
            .unwrap();

        assert_eq!(provider.calls().len(), 3);
        assert_eq!(merged[0].text, "KICK OFF");
        assert_eq!(merged[1].original, "goal");

        let run = db.get_translation_run("run-1").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Completed);
        assert_eq!(run.progress, 100);
        let stored: Vec<TranslatedSegment> = serde_json::from_str(run.content.as_deref().unwrap()).unwrap();
        assert_eq!(stored, merged);
    }

    #[tokio::test]
    async fn test_exhausted_retries_freeze_progress() {
        let (_dir, db) = setup_db();
        // chunk 1 succeeds, chunk 2 fails every attempt
        let provider = Arc::new(ScriptedProvider::new(&[false], false));
        let translator = translator(db.clone(), provider.clone(), 8);

        let texts = ["a".repeat(32), "b".repeat(32), "c".repeat(32)];
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();

        let token = CancellationToken::new();
        let err = translator
            .translate(&request(), &segments(&texts), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, TranslationError::ChunkFailed { chunk: 2, attempts: 3, .. }));
        assert_eq!(provider.calls().len(), 4);

        let run = db.get_translation_run("run-1").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Error);
        assert_eq!(run.total_chunks, 3);
        assert_eq!(run.completed_chunks, 1);
        assert_eq!(run.progress, 33);
    }

    #[tokio::test]
    async fn test_later_chunks_receive_context() {
        let (_dir, db) = setup_db();
        let provider = Arc::new(ScriptedProvider::new(&[false, false], false));
        let translator = translator(db.clone(), provider.clone(), 8);

        let texts = ["a".repeat(32), "b".repeat(32)];
        let texts: Vec<&str> = texts.iter().map(String::as_str).collect();

        translator
            .translate(&request(), &segments(&texts), &CancellationToken::new())
            .await
            .unwrap();

        let calls = provider.calls();
        assert!(!calls[0].contains("Context:"));
        assert!(calls[1].contains(&format!("Context:\n[1] {} -> {}", texts[0], texts[0].to_uppercase())));
        assert!(calls[1].contains(&format!("[2]\t{}", texts[1])));
    }

    #[tokio::test]
    async fn test_short_context_guard_fails_fast() {
        let (_dir, db) = setup_db();
        let provider = Arc::new(ScriptedProvider::new(&[false], true));
        let translator = translator(db.clone(), provider.clone(), 100_000);

        let long = "word ".repeat(1000);
        let err = translator
            .translate(&request(), &segments(&[long.as_str()]), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TranslationError::ContextTooLong { limit: 4000, .. }));
        assert!(provider.calls().is_empty());
        assert_eq!(
            db.get_translation_run("run-1").unwrap().unwrap().status,
            TranslationStatus::Error
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_is_marked_cancelled() {
        let (_dir, db) = setup_db();
        let provider = Arc::new(ScriptedProvider::new(&[false], false));
        let translator = translator(db.clone(), provider.clone(), 100);

        let token = CancellationToken::new();
        token.cancel();
        let err = translator
            .translate(&request(), &segments(&["hello"]), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, TranslationError::Cancelled));
        assert_eq!(
            db.get_translation_run("run-1").unwrap().unwrap().status,
            TranslationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_empty_transcript_completes_immediately() {
        let (_dir, db) = setup_db();
        let provider = Arc::new(ScriptedProvider::new(&[], false));
        let translator = translator(db.clone(), provider.clone(), 100);

        let merged = translator
            .translate(&request(), &[], &CancellationToken::new())
            .await
            .unwrap();

        assert!(merged.is_empty());
        assert!(provider.calls().is_empty());
        let run = db.get_translation_run("run-1").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Completed);
        assert_eq!(run.content.as_deref(), Some("[]"));
    }
}
