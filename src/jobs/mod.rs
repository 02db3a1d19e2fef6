//! Job queue, cancellation and the per-type handlers

pub mod cancellation;
pub mod dispatcher;
pub mod handlers;
pub mod prompt;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::database::{DatabaseManager, JobStatus, JobType};
use crate::error::JobError;

pub use cancellation::CancellationRegistry;
pub use dispatcher::{Dispatcher, DispatcherHandle, QueueSnapshot};
pub use prompt::ScenarioContext;

/// One unit of queued work
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub payload: Value,
}

impl Job {
    /// Build a job; the payload must carry a non-empty `id` (string or number).
    ///
    /// Ids name files under the storage directory, so only `[A-Za-z0-9._-]`
    /// is accepted and `..` is rejected.
    pub fn new(job_type: JobType, payload: Value) -> Result<Self, JobError> {
        let id = match payload.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(JobError::InvalidPayload("payload has no job id".to_string())),
        };

        if !is_safe_id(&id) {
            return Err(JobError::InvalidPayload(format!("job id '{}' is not a safe file name", id)));
        }

        Ok(Self { id, job_type, payload })
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

fn is_safe_id(id: &str) -> bool {
    !id.contains("..")
        && id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Per-run context handed to a handler
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub token: CancellationToken,
    pub cancellation: Arc<CancellationRegistry>,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.cancellation.is_cancelled(&self.job_id)
    }

    /// Short-circuit into the cancelled outcome
    pub fn check_cancelled(&self) -> Result<(), JobError> {
        if self.is_cancelled() {
            Err(JobError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job, ctx: &JobContext) -> Result<(), JobError>;
}

/// Persist the outcome of a failed handler run: `cancelled` for a cooperative
/// abort, otherwise `error` with the failing stage.
pub fn record_failure(db: &DatabaseManager, job_id: &str, stage: &str, err: &JobError) {
    let result = if err.is_cancelled() {
        log::info!("Job {} cancelled during {}", job_id, stage);
        db.update_job_status(job_id, JobStatus::Cancelled, Some(stage))
    } else {
        log::error!("Job {} failed during {}: {}", job_id, stage, err);
        db.mark_job_failed(job_id, stage, &err.to_string())
    };

    if let Err(e) = result {
        log::warn!("Failed to record outcome of job {}: {}", job_id, e);
    }
}
