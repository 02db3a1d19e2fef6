//! Error taxonomy for the job pipeline
//!
//! Each collaborator has its own error enum; handlers fold them into `JobError`,
//! which the dispatcher catches at its boundary.

use thiserror::Error;

/// Failures of the persistent worker channel
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkerError {
    /// A request is already pending; the channel never queues
    #[error("worker is busy with request {0}")]
    Busy(u64),
    /// The worker stdin could not be written
    #[error("worker unavailable: {0}")]
    Unavailable(String),
    /// A line from the worker was not valid JSON
    #[error("worker protocol error: {0}")]
    Protocol(String),
    /// The worker process exited while a request was pending
    #[error("worker exited (code {code:?})")]
    Exited { code: Option<i32> },
    /// The worker process could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
    /// The worker reported a terminal error for the request
    #[error("worker error: {0}")]
    Remote(String),
    /// The request was aborted because its job was cancelled
    #[error("worker request cancelled")]
    Cancelled,
}

/// Failures of the audio extraction collaborator
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("input file not found: {0}")]
    NotFound(String),
    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
    #[error("extraction io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("extraction cancelled")]
    Cancelled,
}

/// Failures of a translation run
#[derive(Debug, Error)]
pub enum TranslationError {
    /// A chunk kept failing after every retry
    #[error("chunk {chunk} failed after {attempts} attempts: {message}")]
    ChunkFailed {
        chunk: usize,
        attempts: u32,
        message: String,
    },
    /// The chunk is too long for a short-context provider; not retried
    #[error(
        "chunk has {chars} characters, more than the {limit} supported by the local {provider} model; \
         switch to a long-context provider"
    )]
    ContextTooLong {
        chars: usize,
        limit: usize,
        provider: String,
    },
    #[error("no active LLM provider")]
    NoProvider,
    /// The provider is unreachable or has no model to translate with
    #[error("LLM provider not ready: {0}")]
    NotReady(String),
    #[error("translation cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Top-level error returned by job handlers
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Translation(#[from] TranslationError),
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),
    #[error("no audio artifact for job {0}")]
    MissingAudio(String),
    #[error("job cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl JobError {
    /// True when the error is the cooperative-cancellation outcome rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            JobError::Cancelled
                | JobError::Worker(WorkerError::Cancelled)
                | JobError::Extraction(ExtractionError::Cancelled)
                | JobError::Translation(TranslationError::Cancelled)
        )
    }
}
