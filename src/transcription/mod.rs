// Streaming transcription state: segment buffering and progress throttling

pub mod progress;
pub mod segment_sink;

pub use progress::{ProgressReporter, ThrottleState};
pub use segment_sink::{Appended, SegmentSink};
