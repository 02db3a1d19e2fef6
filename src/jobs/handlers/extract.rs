//! `extract` jobs: pull the audio track out of an uploaded media file

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::database::{DatabaseManager, JobStatus};
use crate::error::{ExtractionError, JobError};
use crate::jobs::{record_failure, Job, JobContext, JobHandler};
use crate::media::storage::relocate;
use crate::media::{AudioExtractor, LocalStorage};

const STAGE: &str = "extract";

pub struct ExtractHandler {
    db: Arc<DatabaseManager>,
    storage: LocalStorage,
    extractor: Arc<dyn AudioExtractor>,
}

impl ExtractHandler {
    pub fn new(db: Arc<DatabaseManager>, storage: LocalStorage, extractor: Arc<dyn AudioExtractor>) -> Self {
        Self { db, storage, extractor }
    }

    /// The recorded audio artifact, if it is still on disk
    fn existing_audio(&self, job_id: &str) -> Result<Option<PathBuf>, JobError> {
        let Some(record) = self.db.get_job(job_id)? else {
            return Ok(None);
        };
        Ok(record.audio_path.map(PathBuf::from).filter(|p| p.is_file()))
    }

    async fn extract(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        if let Some(existing) = self.existing_audio(&job.id)? {
            log::info!("Job {} already has audio at {}, skipping extraction", job.id, existing.display());
            self.db.update_job_status(&job.id, JobStatus::ReadyToTranscribe, Some(STAGE))?;
            return Ok(());
        }

        let source = job
            .str_field("filepath")
            .or_else(|| job.str_field("source_path"))
            .map(Path::new)
            .ok_or_else(|| JobError::InvalidPayload(format!("extract job {} has no filepath", job.id)))?;

        ctx.check_cancelled()?;
        self.db.update_job_status(&job.id, JobStatus::Extracting, Some(STAGE))?;

        let staging = self.storage.staging_dir();
        tokio::fs::create_dir_all(&staging).await.map_err(ExtractionError::from)?;

        let extracted = self.extractor.extract(source, &staging, &ctx.token).await?;

        if ctx.is_cancelled() {
            let _ = tokio::fs::remove_file(&extracted.path).await;
            return Err(JobError::Cancelled);
        }

        let dest = self.storage.audio_path(&job.id);
        relocate(&extracted.path, &dest).await.map_err(ExtractionError::from)?;

        self.db.set_job_audio(&job.id, &dest.to_string_lossy(), extracted.duration)?;
        self.db.update_job_status(&job.id, JobStatus::ReadyToTranscribe, Some(STAGE))?;

        log::info!("Audio for {} ready at {} ({:.1}s)", job.id, dest.display(), extracted.duration);
        Ok(())
    }
}

#[async_trait]
impl JobHandler for ExtractHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let result = self.extract(job, ctx).await;
        if let Err(err) = &result {
            record_failure(&self.db, &job.id, STAGE, err);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::JobType;
    use crate::jobs::CancellationRegistry;
    use crate::media::ExtractedAudio;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Writes a small file into the destination, or waits for cancellation
    struct FakeExtractor {
        calls: AtomicUsize,
        block: bool,
    }

    #[async_trait]
    impl AudioExtractor for FakeExtractor {
        async fn extract(
            &self,
            input: &Path,
            dest_dir: &Path,
            token: &CancellationToken,
        ) -> Result<ExtractedAudio, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !input.exists() {
                return Err(ExtractionError::NotFound(input.display().to_string()));
            }
            if self.block {
                token.cancelled().await;
                return Err(ExtractionError::Cancelled);
            }
            let path = dest_dir.join("staged.wav");
            tokio::fs::write(&path, b"RIFF").await?;
            Ok(ExtractedAudio { path, duration: 12.5 })
        }
    }

    fn setup(block: bool) -> (TempDir, Arc<DatabaseManager>, Arc<FakeExtractor>, ExtractHandler) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path().join("test.db")).unwrap());
        let extractor = Arc::new(FakeExtractor { calls: AtomicUsize::new(0), block });
        let handler = ExtractHandler::new(db.clone(), LocalStorage::new(dir.path().join("data")), extractor.clone());
        (dir, db, extractor, handler)
    }

    fn context(job_id: &str) -> (Arc<CancellationRegistry>, JobContext) {
        let registry = Arc::new(CancellationRegistry::new(None, None));
        let ctx = JobContext {
            job_id: job_id.to_string(),
            token: registry.begin(job_id),
            cancellation: registry.clone(),
        };
        (registry, ctx)
    }

    #[tokio::test]
    async fn test_extract_relocates_and_records_audio() {
        let (dir, db, extractor, handler) = setup(false);
        let source = dir.path().join("match.mp4");
        std::fs::write(&source, b"video").unwrap();

        let job = Job::new(JobType::Extract, json!({"id": "j1", "filepath": source})).unwrap();
        db.upsert_job_queued("j1", JobType::Extract, None).unwrap();
        let (_registry, ctx) = context("j1");

        handler.run(&job, &ctx).await.unwrap();

        let record = db.get_job("j1").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::ReadyToTranscribe);
        assert_eq!(record.duration, Some(12.5));
        let audio = PathBuf::from(record.audio_path.unwrap());
        assert!(audio.ends_with("audio/j1.wav"));
        assert!(audio.is_file());

        // Second run short-circuits on the existing artifact
        handler.run(&job, &ctx).await.unwrap();
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_source_is_recorded_as_error() {
        let (dir, db, _extractor, handler) = setup(false);
        let job = Job::new(JobType::Extract, json!({"id": "j2", "filepath": dir.path().join("nope.mp4")})).unwrap();
        db.upsert_job_queued("j2", JobType::Extract, None).unwrap();
        let (_registry, ctx) = context("j2");

        assert!(handler.run(&job, &ctx).await.is_err());

        let record = db.get_job("j2").unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Error);
        assert_eq!(record.error_stage.as_deref(), Some("extract"));
    }

    #[tokio::test]
    async fn test_cancel_during_extraction() {
        let (dir, db, _extractor, handler) = setup(true);
        let source = dir.path().join("match.mp4");
        std::fs::write(&source, b"video").unwrap();

        let job = Job::new(JobType::Extract, json!({"id": "j3", "filepath": source})).unwrap();
        db.upsert_job_queued("j3", JobType::Extract, None).unwrap();
        let (registry, ctx) = context("j3");

        let cancel = tokio::spawn({
            let registry = registry.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                registry.cancel("j3").await;
            }
        });

        let err = handler.run(&job, &ctx).await.unwrap_err();
        cancel.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(db.get_job("j3").unwrap().unwrap().status, JobStatus::Cancelled);
    }
}
