// Database models - Re-exports all domain-specific models
//
// This module is split into focused files by domain:
// - job.rs: Job rows and their status
// - transcript.rs: Transcript segments and the working transcript
// - translation.rs: Translation runs

mod job;
mod transcript;
mod translation;

pub use job::{JobRecord, JobStatus, JobType};
pub use transcript::{Transcript, TranscriptSegment};
pub use translation::{TranslatedSegment, TranslationRun, TranslationStatus};
