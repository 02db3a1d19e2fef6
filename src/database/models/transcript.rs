// Database models - Transcript
use serde::{Deserialize, Serialize};

/// One timed unit of transcript text, indexed within its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub segment_index: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

/// The working transcript of a transcription job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub job_id: String,
    pub full_text: String,
    pub segment_count: u32,
    pub language: Option<String>,
    /// Final structured result from the worker, once the job has completed
    pub result_json: Option<String>,
    pub updated_at: String,
}
