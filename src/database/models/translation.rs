// Database models - Translation runs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl TranslationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranslationStatus::Processing => "processing",
            TranslationStatus::Completed => "completed",
            TranslationStatus::Error => "error",
            TranslationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TranslationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranslationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(TranslationStatus::Processing),
            "completed" => Ok(TranslationStatus::Completed),
            "error" => Ok(TranslationStatus::Error),
            "cancelled" => Ok(TranslationStatus::Cancelled),
            other => Err(format!("unknown translation status: {}", other)),
        }
    }
}

/// A translation run over one transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRun {
    pub id: String,
    pub source_job_id: String,
    pub target_language: String,
    pub provider: Option<String>,
    pub status: TranslationStatus,
    pub progress: u32,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    /// JSON array of `TranslatedSegment` once completed
    pub content: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A segment of the merged translation: source timing, translated text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub original: String,
}
