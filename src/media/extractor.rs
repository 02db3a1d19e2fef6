//! Audio extraction through ffmpeg
//!
//! Produces 16 kHz mono PCM WAV, which is what the recogniser expects, and
//! reads the source duration from ffmpeg's banner.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

use crate::error::ExtractionError;

/// Lines of ffmpeg stderr kept for error messages
const STDERR_TAIL: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedAudio {
    pub path: PathBuf,
    /// Seconds
    pub duration: f64,
}

#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Extract the audio track of `input` into a new file under `dest_dir`.
    /// Fails with `ExtractionError::Cancelled` once `token` fires.
    async fn extract(
        &self,
        input: &Path,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<ExtractedAudio, ExtractionError>;
}

pub struct FfmpegExtractor {
    ffmpeg_path: Option<PathBuf>,
}

impl FfmpegExtractor {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self { ffmpeg_path }
    }

    /// Configured binary first, then `ffmpeg` on PATH
    pub fn locate(&self) -> Result<PathBuf, ExtractionError> {
        locate_ffmpeg(self.ffmpeg_path.as_deref())
    }
}

pub fn locate_ffmpeg(configured: Option<&Path>) -> Result<PathBuf, ExtractionError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        log::warn!("Configured ffmpeg not found at {}, searching PATH", path.display());
    }

    which::which("ffmpeg")
        .map_err(|_| ExtractionError::Ffmpeg("ffmpeg not found; install it or set storage.ffmpeg_path".to_string()))
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn extract(
        &self,
        input: &Path,
        dest_dir: &Path,
        token: &CancellationToken,
    ) -> Result<ExtractedAudio, ExtractionError> {
        if !input.exists() {
            return Err(ExtractionError::NotFound(input.display().to_string()));
        }

        let ffmpeg = self.locate()?;
        tokio::fs::create_dir_all(dest_dir).await?;

        let stem = input.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_else(|| "audio".to_string());
        let output = dest_dir.join(format!("{}-{}.wav", stem, uuid::Uuid::new_v4().simple()));

        log::info!("Extracting audio: {} -> {}", input.display(), output.display());

        let args: Vec<std::ffi::OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_os_string(),
            "-vn".into(),
            "-ac".into(),
            "1".into(),
            "-ar".into(),
            "16000".into(),
            "-c:a".into(),
            "pcm_s16le".into(),
            output.as_os_str().to_os_string(),
        ];

        let stderr = match run_ffmpeg(&ffmpeg, &args, token).await {
            Ok(stderr) => stderr,
            Err(e) => {
                let _ = tokio::fs::remove_file(&output).await;
                return Err(e);
            }
        };

        let duration = parse_ffmpeg_duration(&stderr).unwrap_or_else(|| {
            log::warn!("Could not read duration of {} from ffmpeg output", input.display());
            0.0
        });

        log::info!("Extracted {:.1}s of audio from {}", duration, input.display());
        Ok(ExtractedAudio { path: output, duration })
    }
}

/// Run ffmpeg to completion, killing it when `token` fires.
/// Returns the collected stderr.
pub async fn run_ffmpeg(
    ffmpeg: &Path,
    args: &[std::ffi::OsString],
    token: &CancellationToken,
) -> Result<String, ExtractionError> {
    if token.is_cancelled() {
        return Err(ExtractionError::Cancelled);
    }

    let mut cmd = Command::new(ffmpeg);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(target_os = "windows")]
    cmd.creation_flags(CREATE_NO_WINDOW);

    let mut child = cmd.spawn()
        .map_err(|e| ExtractionError::Ffmpeg(format!("Failed to run ffmpeg: {}", e)))?;

    let stderr = child.stderr.take()
        .ok_or_else(|| ExtractionError::Ffmpeg("Failed to get ffmpeg stderr".to_string()))?;

    let collector = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut collected = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push_str(&line);
            collected.push('\n');
        }
        collected
    });

    let exited = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        status = child.wait() => Some(status),
    };

    let Some(status) = exited else {
        log::info!("Cancelling ffmpeg");
        let _ = child.start_kill();
        let _ = child.wait().await;
        collector.abort();
        return Err(ExtractionError::Cancelled);
    };
    let status = status?;

    let output = collector.await.unwrap_or_default();

    if !status.success() {
        let tail: Vec<&str> = output.lines().rev().take(STDERR_TAIL).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(ExtractionError::Ffmpeg(format!(
            "exit code {:?}: {}",
            status.code(),
            tail.join(" | ")
        )));
    }

    Ok(output)
}

/// Parse `Duration: HH:MM:SS.ms` from ffmpeg's stderr
pub fn parse_ffmpeg_duration(stderr: &str) -> Option<f64> {
    stderr.lines()
        .filter_map(|line| line.split("Duration:").nth(1))
        .filter_map(|rest| rest.split(',').next())
        .find_map(|time_str| {
            let parts: Vec<&str> = time_str.trim().split(':').collect();
            if parts.len() != 3 {
                return None;
            }
            let hours: f64 = parts[0].parse().ok()?;
            let minutes: f64 = parts[1].parse().ok()?;
            let seconds: f64 = parts[2].parse().ok()?;
            Some(hours * 3600.0 + minutes * 60.0 + seconds)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_from_banner() {
        let stderr = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'match.mp4':\n  \
                      Duration: 01:32:05.48, start: 0.000000, bitrate: 2500 kb/s\n";
        let duration = parse_ffmpeg_duration(stderr).unwrap();
        assert!((duration - 5525.48).abs() < 1e-6);
    }

    #[test]
    fn test_parse_duration_skips_unknown() {
        assert_eq!(parse_ffmpeg_duration("  Duration: N/A, bitrate: N/A\n"), None);
        assert_eq!(parse_ffmpeg_duration(""), None);
    }

    #[tokio::test]
    async fn test_missing_input_is_not_found() {
        let extractor = FfmpegExtractor::new(None);
        let dir = tempfile::tempdir().unwrap();
        let result = extractor
            .extract(&dir.path().join("nope.mp4"), dir.path(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ExtractionError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result = run_ffmpeg(Path::new("ffmpeg"), &[], &token).await;
        assert!(matches!(result, Err(ExtractionError::Cancelled)));
    }
}
