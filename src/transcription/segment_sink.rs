//! Incremental persistence of streamed transcript segments
//!
//! Segments are indexed 0, 1, 2, ... per session. The whole accumulated
//! sequence is written on each flush, so the durable partial transcript is
//! never more than `max_buffered` segments or `max_interval_ms` behind.

use anyhow::Result;
use std::time::Instant;

use crate::config::SinkPolicy;
use crate::database::{DatabaseManager, TranscriptSegment};
use crate::worker::SegmentData;

/// Whether a flush should write now
pub fn should_flush(policy: &SinkPolicy, buffered: usize, since_last_flush_ms: u64, force: bool) -> bool {
    if force {
        return true;
    }
    buffered > 0 && (buffered >= policy.max_buffered || since_last_flush_ms >= policy.max_interval_ms)
}

struct Session {
    job_id: String,
    segments: Vec<TranscriptSegment>,
    buffered: usize,
    last_flush: Instant,
    first_segment_at: Option<Instant>,
}

/// Result of appending one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    pub segment_index: u32,
    /// True for the first segment of the session
    pub first: bool,
}

pub struct SegmentSink {
    policy: SinkPolicy,
    session: Option<Session>,
}

impl SegmentSink {
    pub fn new(policy: SinkPolicy) -> Self {
        Self { policy, session: None }
    }

    /// Begin a session for `job_id`, dropping any previous buffer
    pub fn start_session(&mut self, job_id: &str, now: Instant) {
        self.session = Some(Session {
            job_id: job_id.to_string(),
            segments: Vec::new(),
            buffered: 0,
            last_flush: now,
            first_segment_at: None,
        });
    }

    /// Store a segment under the next index. `None` when no session is open.
    pub fn append(&mut self, data: SegmentData, now: Instant) -> Option<Appended> {
        let session = self.session.as_mut()?;

        let segment_index = session.segments.len() as u32;
        session.segments.push(TranscriptSegment {
            segment_index,
            start_time: data.start,
            end_time: data.end,
            text: data.text,
        });
        session.buffered += 1;

        let first = session.first_segment_at.is_none();
        if first {
            session.first_segment_at = Some(now);
        }

        crate::perf_trace!("Segment {} buffered for {}", segment_index, session.job_id);
        Some(Appended { segment_index, first })
    }

    /// Write the accumulated transcript if forced or the throttle allows.
    /// Returns true when a write happened.
    pub fn flush(&mut self, db: &DatabaseManager, force: bool, now: Instant) -> Result<bool> {
        let policy = self.policy;
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };

        let since_ms = now.saturating_duration_since(session.last_flush).as_millis() as u64;
        if !should_flush(&policy, session.buffered, since_ms, force) {
            return Ok(false);
        }

        let full_text = concat_text(&session.segments);
        db.replace_transcript_segments(&session.job_id, &session.segments, &full_text)?;

        crate::perf_debug!(
            "Flushed {} segments ({} new) for {}",
            session.segments.len(), session.buffered, session.job_id
        );

        session.buffered = 0;
        session.last_flush = now;
        Ok(true)
    }

    /// Force a final flush and close the session, returning its segments
    pub fn end_session(&mut self, db: &DatabaseManager, now: Instant) -> Result<Vec<TranscriptSegment>> {
        self.flush(db, true, now)?;
        Ok(self.session.take().map(|s| s.segments).unwrap_or_default())
    }

    pub fn segment_count(&self) -> usize {
        self.session.as_ref().map(|s| s.segments.len()).unwrap_or(0)
    }
}

/// Working transcript text: segment texts in order
pub fn concat_text(segments: &[TranscriptSegment]) -> String {
    let text: String = segments.iter().map(|s| s.text.as_str()).collect();
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn create_test_db() -> (TempDir, DatabaseManager) {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn seg(start: f64, text: &str) -> SegmentData {
        SegmentData { start, end: start + 1.0, text: text.to_string() }
    }

    #[test]
    fn test_should_flush_thresholds() {
        let policy = SinkPolicy::default();
        assert!(!should_flush(&policy, 4, 1999, false));
        assert!(should_flush(&policy, 5, 0, false));
        assert!(should_flush(&policy, 1, 2000, false));
        assert!(!should_flush(&policy, 0, 5000, false));
        assert!(should_flush(&policy, 0, 0, true));
    }

    #[test]
    fn test_indices_restart_per_session() {
        let mut sink = SegmentSink::new(SinkPolicy::default());
        let now = Instant::now();

        assert!(sink.append(seg(0.0, "lost"), now).is_none());

        sink.start_session("j1", now);
        let a = sink.append(seg(0.0, " Kick"), now).unwrap();
        let b = sink.append(seg(1.0, " off"), now).unwrap();
        assert_eq!((a.segment_index, a.first), (0, true));
        assert_eq!((b.segment_index, b.first), (1, false));

        sink.start_session("j2", now);
        assert_eq!(sink.append(seg(0.0, "again"), now).unwrap().segment_index, 0);
        assert_eq!(sink.segment_count(), 1);
    }

    #[test]
    fn test_flush_is_throttled_by_count_and_time() {
        let (_dir, db) = create_test_db();
        let mut sink = SegmentSink::new(SinkPolicy::default());
        let base = Instant::now();
        sink.start_session("j1", base);

        for i in 0..4 {
            sink.append(seg(i as f64, "x"), base).unwrap();
            assert!(!sink.flush(&db, false, base).unwrap());
        }
        assert!(db.get_transcript_segments("j1").unwrap().is_empty());

        sink.append(seg(4.0, "y"), base).unwrap();
        assert!(sink.flush(&db, false, base).unwrap());
        assert_eq!(db.get_transcript_segments("j1").unwrap().len(), 5);

        sink.append(seg(5.0, "z"), base).unwrap();
        assert!(!sink.flush(&db, false, base + Duration::from_millis(1999)).unwrap());
        assert!(sink.flush(&db, false, base + Duration::from_millis(2000)).unwrap());
        assert_eq!(db.get_transcript_segments("j1").unwrap().len(), 6);
    }

    #[test]
    fn test_end_session_forces_flush() {
        let (_dir, db) = create_test_db();
        let mut sink = SegmentSink::new(SinkPolicy::default());
        let now = Instant::now();

        sink.start_session("j1", now);
        sink.append(seg(0.0, " Goal"), now).unwrap();
        sink.append(seg(1.0, " for the home side"), now).unwrap();

        let segments = sink.end_session(&db, now).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(sink.segment_count(), 0);

        let transcript = db.get_transcript("j1").unwrap().unwrap();
        assert_eq!(transcript.full_text, "Goal for the home side");
        assert_eq!(transcript.segment_count, 2);
    }
}
