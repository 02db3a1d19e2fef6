//! SRT rendering

use crate::database::{TranscriptSegment, TranslatedSegment};

#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl From<&TranscriptSegment> for SubtitleCue {
    fn from(segment: &TranscriptSegment) -> Self {
        Self {
            start: segment.start_time,
            end: segment.end_time,
            text: segment.text.trim().to_string(),
        }
    }
}

impl From<&TranslatedSegment> for SubtitleCue {
    fn from(segment: &TranslatedSegment) -> Self {
        Self {
            start: segment.start,
            end: segment.end,
            text: segment.text.trim().to_string(),
        }
    }
}

/// `HH:MM:SS,mmm`, rounded to the nearest millisecond
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis)
}

/// Render cues with 1-based numbering; empty cues are skipped
pub fn render_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    let mut number = 0;

    for cue in cues.iter().filter(|c| !c.text.is_empty()) {
        number += 1;
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            number,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text
        ));
    }

    out
}
