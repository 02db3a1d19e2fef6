//! Line protocol spoken with the speech-recognition worker
//!
//! Requests and responses are single-line JSON objects. The worker echoes the
//! request `id` on every message it emits, so late output from an aborted
//! request can be told apart from the current one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerTask {
    Transcribe,
    Translate,
}

/// One unit of work for the worker. `id` is assigned by the channel on send.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRequest {
    pub id: u64,
    pub audio_file: String,
    pub duration: f64,
    pub task: WorkerTask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prompt: Option<String>,
    /// `None` lets the worker detect the language
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_on_previous_text: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio_threshold: Option<f64>,
}

impl WorkerRequest {
    pub fn transcribe(audio_file: impl Into<String>, duration: f64) -> Self {
        Self {
            id: 0,
            audio_file: audio_file.into(),
            duration,
            task: WorkerTask::Transcribe,
            initial_prompt: None,
            language: None,
            condition_on_previous_text: None,
            compression_ratio_threshold: None,
        }
    }

    pub fn with_initial_prompt(mut self, prompt: Option<String>) -> Self {
        self.initial_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    pub fn to_line(&self) -> Result<String, WorkerError> {
        let mut line = serde_json::to_string(self)
            .map_err(|e| WorkerError::Unavailable(format!("Failed to serialize request: {}", e)))?;
        line.push('\n');
        Ok(line)
    }
}

/// Streamed segment payload
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SegmentData {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A decoded worker line
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Progress { id: Option<u64>, progress_pct: f64 },
    Segment { id: Option<u64>, data: SegmentData },
    /// Terminal success
    Result { id: Option<u64>, result: Value },
    /// Terminal failure
    Error { id: Option<u64>, message: String },
    /// A typed message this side does not understand; ignored
    Other { id: Option<u64>, kind: String },
}

impl WorkerMessage {
    /// Decode one line of worker output.
    ///
    /// Messages without a `type` tag are legacy terminal messages: `result`
    /// resolves, `error` rejects. A `result`-typed message carrying `error`
    /// is a rejection.
    pub fn parse(line: &str) -> Result<Self, WorkerError> {
        let value: Value = serde_json::from_str(line.trim())
            .map_err(|e| WorkerError::Protocol(format!("invalid JSON from worker: {}", e)))?;

        let obj = value.as_object()
            .ok_or_else(|| WorkerError::Protocol("worker message is not an object".to_string()))?;

        let id = obj.get("id").and_then(Value::as_u64);
        let error_text = obj.get("error").filter(|e| !e.is_null()).map(error_to_string);

        match obj.get("type").and_then(Value::as_str) {
            Some("progress") => {
                let progress_pct = obj.get("progress_pct").and_then(Value::as_f64)
                    .ok_or_else(|| WorkerError::Protocol("progress message without progress_pct".to_string()))?;
                Ok(WorkerMessage::Progress { id, progress_pct })
            }
            Some("segment") => {
                let data = obj.get("data").cloned()
                    .ok_or_else(|| WorkerError::Protocol("segment message without data".to_string()))?;
                let data: SegmentData = serde_json::from_value(data)
                    .map_err(|e| WorkerError::Protocol(format!("malformed segment: {}", e)))?;
                Ok(WorkerMessage::Segment { id, data })
            }
            Some("result") => match error_text {
                Some(message) => Ok(WorkerMessage::Error { id, message }),
                None => Ok(WorkerMessage::Result {
                    id,
                    result: obj.get("result").cloned().unwrap_or(Value::Null),
                }),
            },
            Some("error") => {
                let message = obj.get("message").map(error_to_string)
                    .or(error_text)
                    .unwrap_or_else(|| "unknown worker error".to_string());
                Ok(WorkerMessage::Error { id, message })
            }
            Some(other) => Ok(WorkerMessage::Other { id, kind: other.to_string() }),
            None => {
                if let Some(message) = error_text {
                    Ok(WorkerMessage::Error { id, message })
                } else if let Some(result) = obj.get("result") {
                    Ok(WorkerMessage::Result { id, result: result.clone() })
                } else {
                    Err(WorkerError::Protocol("untyped worker message without result or error".to_string()))
                }
            }
        }
    }

    pub fn id(&self) -> Option<u64> {
        match self {
            WorkerMessage::Progress { id, .. }
            | WorkerMessage::Segment { id, .. }
            | WorkerMessage::Result { id, .. }
            | WorkerMessage::Error { id, .. }
            | WorkerMessage::Other { id, .. } => *id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerMessage::Result { .. } | WorkerMessage::Error { .. })
    }
}

fn error_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line_shape() {
        let mut request = WorkerRequest::transcribe("/data/audio/j1.wav", 5400.0)
            .with_initial_prompt(Some("Arsenal, Chelsea".to_string()));
        request.id = 7;

        let line = request.to_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["task"], "transcribe");
        assert_eq!(value["initial_prompt"], "Arsenal, Chelsea");
        assert!(value["language"].is_null());
        assert!(value.get("compression_ratio_threshold").is_none());
    }

    #[test]
    fn test_blank_prompt_is_omitted() {
        let request = WorkerRequest::transcribe("a.wav", 1.0).with_initial_prompt(Some("  ".into()));
        assert!(request.initial_prompt.is_none());
    }

    #[test]
    fn test_parse_streamed_messages() {
        let progress = WorkerMessage::parse(r#"{"type":"progress","id":3,"progress_pct":12.5}"#).unwrap();
        assert_eq!(progress, WorkerMessage::Progress { id: Some(3), progress_pct: 12.5 });
        assert!(!progress.is_terminal());

        let segment = WorkerMessage::parse(
            r#"{"type":"segment","id":3,"data":{"start":0.0,"end":2.4,"text":" Kick off"}}"#,
        ).unwrap();
        match segment {
            WorkerMessage::Segment { id, data } => {
                assert_eq!(id, Some(3));
                assert_eq!(data.text, " Kick off");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_terminal_messages() {
        let ok = WorkerMessage::parse(r#"{"type":"result","id":1,"result":{"text":"hi"}}"#).unwrap();
        assert_eq!(ok, WorkerMessage::Result { id: Some(1), result: json!({"text": "hi"}) });

        let rejected = WorkerMessage::parse(r#"{"type":"result","id":1,"error":"File not found"}"#).unwrap();
        assert_eq!(rejected, WorkerMessage::Error { id: Some(1), message: "File not found".into() });

        let typed_error = WorkerMessage::parse(r#"{"type":"error","message":"oom"}"#).unwrap();
        assert_eq!(typed_error, WorkerMessage::Error { id: None, message: "oom".into() });
    }

    #[test]
    fn test_parse_legacy_untyped_messages() {
        let legacy_ok = WorkerMessage::parse(r#"{"result":{"segments":[]}}"#).unwrap();
        assert!(matches!(legacy_ok, WorkerMessage::Result { id: None, .. }));

        let legacy_err = WorkerMessage::parse(r#"{"error":"model missing","id":null}"#).unwrap();
        assert_eq!(legacy_err, WorkerMessage::Error { id: None, message: "model missing".into() });

        assert!(WorkerMessage::parse(r#"{"hello":1}"#).is_err());
    }

    #[test]
    fn test_parse_failures_are_protocol_errors() {
        assert!(matches!(WorkerMessage::parse("not json"), Err(WorkerError::Protocol(_))));
        assert!(matches!(WorkerMessage::parse("[1,2]"), Err(WorkerError::Protocol(_))));
        assert!(matches!(
            WorkerMessage::parse(r#"{"type":"segment","data":{"start":1}}"#),
            Err(WorkerError::Protocol(_))
        ));

        let unknown = WorkerMessage::parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert_eq!(unknown, WorkerMessage::Other { id: None, kind: "heartbeat".into() });
    }
}
