// Media collaborators: ffmpeg extraction, artifact storage, subtitle files

pub mod extractor;
pub mod storage;
pub mod subtitles;

pub use extractor::{AudioExtractor, ExtractedAudio, FfmpegExtractor};
pub use storage::LocalStorage;
pub use subtitles::{render_srt, SubtitleCue};
