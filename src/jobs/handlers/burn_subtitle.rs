//! `burn_subtitle` jobs: render an SRT and hard-code it into the video

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::database::{DatabaseManager, JobStatus, TranslatedSegment, TranslationStatus};
use crate::error::{ExtractionError, JobError};
use crate::jobs::{record_failure, Job, JobContext, JobHandler};
use crate::media::extractor::{locate_ffmpeg, run_ffmpeg};
use crate::media::storage::ensure_parent;
use crate::media::{render_srt, LocalStorage, SubtitleCue};

const STAGE: &str = "burn_subtitle";

pub struct BurnSubtitleHandler {
    db: Arc<DatabaseManager>,
    storage: LocalStorage,
    ffmpeg_path: Option<PathBuf>,
}

/// `subtitles=` filter argument for `-vf`.
///
/// The path is escaped twice: once as a filter option value, then again for
/// the filtergraph it sits in.
pub fn subtitles_filter(srt: &Path) -> String {
    let path = srt.to_string_lossy().replace('\\', "/");
    let value = escape_with(&path, &['\\', '\'', ':']);
    format!("subtitles=filename={}", escape_with(&value, &['\\', '\'', '[', ']', ',', ';']))
}

fn escape_with(input: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl BurnSubtitleHandler {
    pub fn new(db: Arc<DatabaseManager>, storage: LocalStorage, ffmpeg_path: Option<PathBuf>) -> Self {
        Self { db, storage, ffmpeg_path }
    }

    /// Cues from the completed translation run if there is one, else the
    /// source transcript
    fn load_cues(&self, job: &Job, source_job_id: &str) -> Result<Vec<SubtitleCue>, JobError> {
        if let Some(run_id) = job.str_field("run_id") {
            match self.db.get_translation_run(run_id)? {
                Some(run) if run.status == TranslationStatus::Completed => {
                    let content = run.content.unwrap_or_default();
                    let segments: Vec<TranslatedSegment> = serde_json::from_str(&content)
                        .map_err(|e| JobError::Store(anyhow::anyhow!("corrupt translation run {}: {}", run_id, e)))?;
                    return Ok(segments.iter().map(SubtitleCue::from).collect());
                }
                Some(run) => log::warn!(
                    "Translation run {} is {}, burning source transcript instead",
                    run_id,
                    run.status
                ),
                None => log::warn!("Translation run {} not found, burning source transcript", run_id),
            }
        }

        let segments = self.db.get_transcript_segments(source_job_id)?;
        Ok(segments.iter().map(SubtitleCue::from).collect())
    }

    fn video_path(&self, job: &Job, source_job_id: &str) -> Result<PathBuf, JobError> {
        if let Some(path) = job.str_field("video_path").or_else(|| job.str_field("filepath")) {
            return Ok(PathBuf::from(path));
        }

        self.db
            .get_job(source_job_id)?
            .and_then(|record| record.source_path)
            .map(PathBuf::from)
            .ok_or_else(|| JobError::InvalidPayload(format!("burn job {} has no video", job.id)))
    }

    async fn burn(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let source_job_id = job.str_field("source_job_id").unwrap_or(&job.id).to_string();
        let video = self.video_path(job, &source_job_id)?;
        if !video.is_file() {
            return Err(ExtractionError::NotFound(video.display().to_string()).into());
        }

        let cues = self.load_cues(job, &source_job_id)?;
        if cues.iter().all(|c| c.text.is_empty()) {
            return Err(JobError::InvalidPayload(format!("no subtitles to burn for {}", source_job_id)));
        }

        ctx.check_cancelled()?;

        let srt_path = self.storage.subtitle_path(&job.id);
        ensure_parent(&srt_path).await.map_err(ExtractionError::from)?;
        tokio::fs::write(&srt_path, render_srt(&cues)).await.map_err(ExtractionError::from)?;
        log::info!("Wrote {} subtitle cues to {}", cues.len(), srt_path.display());

        self.db.update_job_status(&job.id, JobStatus::Burning, Some(STAGE))?;

        let output = self.storage.render_path(&job.id);
        ensure_parent(&output).await.map_err(ExtractionError::from)?;

        let ffmpeg = locate_ffmpeg(self.ffmpeg_path.as_deref())?;
        let args: Vec<OsString> = vec![
            "-y".into(),
            "-i".into(),
            video.as_os_str().to_os_string(),
            "-vf".into(),
            subtitles_filter(&srt_path).into(),
            "-c:a".into(),
            "copy".into(),
            output.as_os_str().to_os_string(),
        ];

        if let Err(e) = run_ffmpeg(&ffmpeg, &args, &ctx.token).await {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e.into());
        }

        ctx.check_cancelled()?;
        self.db.update_job_status(&job.id, JobStatus::Completed, Some(STAGE))?;
        log::info!("Rendered {} with subtitles to {}", job.id, output.display());
        Ok(())
    }
}

#[async_trait]
impl JobHandler for BurnSubtitleHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let result = self.burn(job, ctx).await;
        if let Err(err) = &result {
            record_failure(&self.db, &job.id, STAGE, err);
        }
        result
    }
}
