//! `transcribe` jobs: one worker request, segments streamed into the sink

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use super::resolve_audio;
use crate::config::{ProgressPolicy, SinkPolicy};
use crate::database::{DatabaseManager, JobStatus};
use crate::error::JobError;
use crate::jobs::{record_failure, Job, JobContext, JobHandler, ScenarioContext};
use crate::media::LocalStorage;
use crate::transcription::{ProgressReporter, SegmentSink};
use crate::worker::{SegmentData, WorkerChannel, WorkerEvent, WorkerRequest};

const STAGE: &str = "transcribe";

pub struct TranscribeHandler {
    db: Arc<DatabaseManager>,
    worker: Arc<WorkerChannel>,
    storage: LocalStorage,
    sink: Mutex<SegmentSink>,
    progress: Mutex<ProgressReporter>,
}

impl TranscribeHandler {
    pub fn new(
        db: Arc<DatabaseManager>,
        worker: Arc<WorkerChannel>,
        storage: LocalStorage,
        sink_policy: SinkPolicy,
        progress_policy: ProgressPolicy,
    ) -> Self {
        Self {
            db,
            worker,
            storage,
            sink: Mutex::new(SegmentSink::new(sink_policy)),
            progress: Mutex::new(ProgressReporter::new(progress_policy)),
        }
    }

    async fn transcribe(&self, job: &Job, ctx: &JobContext, audio: &Path, duration: f64) -> Result<(), JobError> {
        let prompt = ScenarioContext::from_payload(&job.payload).initial_prompt();
        if let Some(prompt) = &prompt {
            log::debug!("Initial prompt for {}: {}", job.id, prompt);
        }

        ctx.check_cancelled()?;

        let mut sink = self.sink.lock().await;
        let mut progress = self.progress.lock().await;

        self.db.reset_transcript(&job.id)?;
        sink.start_session(&job.id, Instant::now());
        self.db.update_job_status(&job.id, JobStatus::Transcribing, Some(STAGE))?;
        progress.reset(&job.id);

        let request = WorkerRequest::transcribe(audio.to_string_lossy(), duration)
            .with_initial_prompt(prompt)
            .with_language(job.str_field("language").map(str::to_string));

        let sent_at = Instant::now();
        let mut call = self.worker.send(&job.id, request).await?;

        loop {
            let event = tokio::select! {
                biased;
                _ = ctx.token.cancelled() => {
                    // The registry normally aborts the request itself; this
                    // covers a cancel that landed before the request existed
                    self.worker.abort(&job.id).await;
                    keep_partial(&mut sink, &self.db, &job.id);
                    return Err(JobError::Cancelled);
                }
                event = call.events.recv() => event,
            };

            let Some(event) = event else { break };
            let now = Instant::now();

            match event {
                WorkerEvent::Segment(data) => {
                    if let Some(appended) = sink.append(data, now) {
                        if appended.first {
                            let latency_ms = now.duration_since(sent_at).as_millis() as i64;
                            log::info!("First segment for {} after {} ms", job.id, latency_ms);
                            if let Err(e) = self.db.set_first_segment_latency(&job.id, latency_ms) {
                                log::warn!("Failed to record first segment latency for {}: {}", job.id, e);
                            }
                        }
                    }
                    if let Err(e) = sink.flush(&self.db, false, now) {
                        log::warn!("Partial transcript flush failed for {}: {}", job.id, e);
                    }
                }
                WorkerEvent::Progress(pct) => {
                    if let Err(e) = progress.report(&self.db, pct, now) {
                        log::warn!("Failed to persist progress for {}: {}", job.id, e);
                    }
                }
            }
        }

        let result = match call.outcome().await {
            Ok(result) => result,
            Err(e) => {
                keep_partial(&mut sink, &self.db, &job.id);
                return Err(e.into());
            }
        };

        if sink.segment_count() == 0 {
            // Workers that do not stream only report segments in the result
            for data in result_segments(&result) {
                sink.append(data, Instant::now());
            }
        }

        let segments = sink.end_session(&self.db, Instant::now())?;
        let language = result.get("language").and_then(Value::as_str);
        self.db.save_transcript_result(&job.id, &result.to_string(), language)?;

        ctx.check_cancelled()?;

        self.db.update_job_status(&job.id, JobStatus::Completed, Some(STAGE))?;
        log::info!(
            "Transcribed {} into {} segments (language {})",
            job.id,
            segments.len(),
            language.unwrap_or("unknown")
        );
        Ok(())
    }
}

/// Persist whatever was streamed before a failure or a cancel
fn keep_partial(sink: &mut SegmentSink, db: &DatabaseManager, job_id: &str) {
    if let Err(e) = sink.end_session(db, Instant::now()) {
        log::warn!("Failed to keep partial transcript for {}: {}", job_id, e);
    }
}

fn result_segments(result: &Value) -> Vec<SegmentData> {
    result
        .get("segments")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<SegmentData>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl JobHandler for TranscribeHandler {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError> {
        let (audio, duration) = match resolve_audio(&self.db, job) {
            Ok(found) => found,
            Err(err) => {
                record_failure(&self.db, &job.id, STAGE, &err);
                return Err(err);
            }
        };

        let Err(err) = self.transcribe(job, ctx, &audio, duration).await else {
            return Ok(());
        };

        if !err.is_cancelled() {
            // Best effort; the failure itself is what gets recorded
            match self.storage.save_diagnostic_copy(&job.id, &audio).await {
                Ok(copy) => log::info!("Saved diagnostic copy of {} at {}", job.id, copy.display()),
                Err(e) => log::debug!("Diagnostic copy for {} failed: {}", job.id, e),
            }
        }

        record_failure(&self.db, &job.id, STAGE, &err);
        Err(err)
    }
}
