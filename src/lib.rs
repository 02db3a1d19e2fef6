// Matchscribe - media job orchestration
//
// Extracts audio from uploaded match footage, drives a persistent
// speech-recognition worker, translates transcripts with an LLM and burns
// subtitles back into the video. Jobs run one at a time from a FIFO queue.

// Hot-path logging macros - exported for use by other modules
#[macro_use]
pub mod macros;

pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod llm_engine;
pub mod media;
pub mod state;
pub mod transcription;
pub mod translation;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{ExtractionError, JobError, TranslationError, WorkerError};
pub use jobs::{DispatcherHandle, QueueSnapshot};
pub use state::AppState;

/// Initialize env_logger to output to stderr (reads RUST_LOG env var)
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}
