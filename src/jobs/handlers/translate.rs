//! `translate` jobs: run the chunked translator over a finished transcript

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ChunkingConfig, TranslationConfig};
use crate::database::{DatabaseManager, JobStatus};
use crate::error::{JobError, TranslationError};
use crate::jobs::{record_failure, Job, JobContext, JobHandler};
use crate::llm_engine::{LlmEngine, LlmProvider};
use crate::translation::{TranslationRequest, Translator};

const STAGE: &str = "translate";

pub struct TranslateHandler {
    db: Arc<DatabaseManager>,
    engine: Arc<LlmEngine>,
    chunking: ChunkingConfig,
    settings: TranslationConfig,
}

impl TranslateHandler {
    pub fn new(
        db: Arc<DatabaseManager>,
        engine: Arc<LlmEngine>,
        chunking: ChunkingConfig,
        settings: TranslationConfig,
    ) -> Self {
        Self { db, engine, chunking, settings }
    }

    /// Payload: `source_job_id` (defaults to the job id), `run_id` (defaults
    /// to the job id) and `target_language` (defaults to configuration).
    fn request_for(&self, job: &Job) -> TranslationRequest {
        TranslationRequest {
            run_id: job.str_field("run_id").unwrap_or(&job.id).to_string(),
            source_job_id: job.str_field("source_job_id").unwrap_or(&job.id).to_string(),
            target_language: job
                .str_field("target_language")
                .unwrap_or(&self.settings.target_language)
                .to_string(),
        }
    }

    async fn translate(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let request = self.request_for(job);

        ctx.check_cancelled()?;

        if self.db.get_transcript(&request.source_job_id)?.is_none() {
            return Err(JobError::InvalidPayload(format!(
                "no transcript for job {}",
                request.source_job_id
            )));
        }
        let segments = self.db.get_transcript_segments(&request.source_job_id)?;

        let provider = self.engine.active_provider().await.map_err(|e| {
            log::error!("No LLM provider for {}: {}", job.id, e);
            TranslationError::NoProvider
        })?;

        ensure_model(provider.as_ref()).await?;

        self.db.update_job_status(&job.id, JobStatus::Translating, Some(STAGE))?;

        let translator = Translator::new(
            Arc::clone(&self.db),
            provider,
            self.chunking,
            self.settings.clone(),
        );
        let merged = translator.translate(&request, &segments, &ctx.token).await?;

        ctx.check_cancelled()?;
        self.db.update_job_status(&job.id, JobStatus::Completed, Some(STAGE))?;

        log::info!(
            "Translated {} segments of {} into {} (run {})",
            merged.len(),
            request.source_job_id,
            request.target_language,
            request.run_id
        );
        Ok(())
    }
}

/// Make sure the provider has a model selected, falling back to the first one
/// it lists when configuration named none
async fn ensure_model(provider: &dyn LlmProvider) -> Result<(), TranslationError> {
    if provider.is_ready().await {
        return Ok(());
    }

    if provider.current_model().await.is_none() {
        let models = provider
            .list_models()
            .await
            .map_err(|e| TranslationError::NotReady(e.to_string()))?;
        let Some(model) = models.first() else {
            return Err(TranslationError::NotReady(format!(
                "{} has no models available",
                provider.provider_name()
            )));
        };

        log::info!("No model configured for {}, using {}", provider.provider_name(), model.id);
        provider
            .initialize(&model.id)
            .await
            .map_err(|e| TranslationError::NotReady(e.to_string()))?;
    }

    if provider.is_ready().await {
        Ok(())
    } else {
        Err(TranslationError::NotReady(format!("{} is not reachable", provider.provider_name())))
    }
}

#[async_trait]
impl JobHandler for TranslateHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let result = self.translate(job, ctx).await;
        if let Err(err) = &result {
            record_failure(&self.db, &job.id, STAGE, err);
        }
        result
    }
}
