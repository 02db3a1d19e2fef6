// Database models - Job
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of queued work; each kind has at most one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Extract,
    Transcribe,
    Translate,
    BurnSubtitle,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extract => "extract",
            JobType::Transcribe => "transcribe",
            JobType::Translate => "translate",
            JobType::BurnSubtitle => "burn_subtitle",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(JobType::Extract),
            "transcribe" => Ok(JobType::Transcribe),
            "translate" => Ok(JobType::Translate),
            "burn_subtitle" => Ok(JobType::BurnSubtitle),
            other => Err(format!("unknown job type: {}", other)),
        }
    }
}

/// Persisted lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Extracting,
    ReadyToTranscribe,
    Transcribing,
    Translating,
    Burning,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Extracting => "extracting",
            JobStatus::ReadyToTranscribe => "ready_to_transcribe",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Translating => "translating",
            JobStatus::Burning => "burning",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses are never overwritten by a late progress write
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "extracting" => Ok(JobStatus::Extracting),
            "ready_to_transcribe" => Ok(JobStatus::ReadyToTranscribe),
            "transcribing" => Ok(JobStatus::Transcribing),
            "translating" => Ok(JobStatus::Translating),
            "burning" => Ok(JobStatus::Burning),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// A job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub stage: Option<String>,
    pub progress: f64,
    pub source_path: Option<String>,
    pub audio_path: Option<String>,
    pub duration: Option<f64>,
    pub first_segment_latency_ms: Option<i64>,
    pub error_stage: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}
