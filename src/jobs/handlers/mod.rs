//! Handlers for the four job types

pub mod burn_subtitle;
pub mod extract;
pub mod transcribe;
pub mod translate;

pub use burn_subtitle::BurnSubtitleHandler;
pub use extract::ExtractHandler;
pub use transcribe::TranscribeHandler;
pub use translate::TranslateHandler;

use std::path::PathBuf;

use super::Job;
use crate::database::DatabaseManager;
use crate::error::JobError;

/// Audio artifact of a job: the extracted file on record, else the payload's
/// `audio_path`. Duration comes from the same place, `0.0` when unknown.
pub(crate) fn resolve_audio(db: &DatabaseManager, job: &Job) -> Result<(PathBuf, f64), JobError> {
    let record = db.get_job(&job.id)?;

    let from_record = record
        .as_ref()
        .and_then(|r| r.audio_path.as_ref().map(|p| (PathBuf::from(p), r.duration.unwrap_or(0.0))));
    let from_payload = job.str_field("audio_path").map(|p| {
        let duration = job.payload.get("duration").and_then(|d| d.as_f64()).unwrap_or(0.0);
        (PathBuf::from(p), duration)
    });

    match from_record.or(from_payload) {
        Some((path, duration)) if path.is_file() => Ok((path, duration)),
        Some((path, _)) => Err(JobError::MissingAudio(format!("{} ({} does not exist)", job.id, path.display()))),
        None => Err(JobError::MissingAudio(job.id.clone())),
    }
}
