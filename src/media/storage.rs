//! On-disk layout for job artifacts

use std::io;
use std::path::{Path, PathBuf};

/// Canonical per-job files under one writable base directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Scratch directory for in-progress extraction output
    pub fn staging_dir(&self) -> PathBuf {
        self.base_dir.join("staging")
    }

    pub fn audio_path(&self, job_id: &str) -> PathBuf {
        self.base_dir.join("audio").join(format!("{}.wav", job_id))
    }

    pub fn diagnostics_path(&self, job_id: &str, ext: &str) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
        self.base_dir.join("diagnostics").join(format!("{}-{}.{}", job_id, stamp, ext))
    }

    pub fn subtitle_path(&self, job_id: &str) -> PathBuf {
        self.base_dir.join("subtitles").join(format!("{}.srt", job_id))
    }

    pub fn render_path(&self, job_id: &str) -> PathBuf {
        self.base_dir.join("renders").join(format!("{}.mp4", job_id))
    }

    /// Keep a copy of a failed job's artifact for inspection
    pub async fn save_diagnostic_copy(&self, job_id: &str, artifact: &Path) -> io::Result<PathBuf> {
        let ext = artifact.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        let dest = self.diagnostics_path(job_id, ext);
        ensure_parent(&dest).await?;
        tokio::fs::copy(artifact, &dest).await?;
        Ok(dest)
    }
}

pub async fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

/// Move a file, falling back to copy + delete across filesystems
pub async fn relocate(src: &Path, dest: &Path) -> io::Result<()> {
    ensure_parent(dest).await?;

    match tokio::fs::rename(src, dest).await {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!("rename {} failed ({}), copying instead", src.display(), e);
            tokio::fs::copy(src, dest).await?;
            if let Err(e) = tokio::fs::remove_file(src).await {
                log::warn!("Failed to remove {} after copy: {}", src.display(), e);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let storage = LocalStorage::new("/srv/data");
        assert_eq!(storage.audio_path("j1"), PathBuf::from("/srv/data/audio/j1.wav"));
        assert_eq!(storage.subtitle_path("j1"), PathBuf::from("/srv/data/subtitles/j1.srt"));
        assert_eq!(storage.render_path("j1"), PathBuf::from("/srv/data/renders/j1.mp4"));

        let diag = storage.diagnostics_path("j1", "wav");
        assert!(diag.starts_with("/srv/data/diagnostics"));
        assert!(diag.to_string_lossy().ends_with(".wav"));
    }

    #[tokio::test]
    async fn test_relocate_and_diagnostic_copy() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        let src = dir.path().join("staging").join("tmp.wav");
        ensure_parent(&src).await.unwrap();
        tokio::fs::write(&src, b"RIFF").await.unwrap();

        let dest = storage.audio_path("j1");
        relocate(&src, &dest).await.unwrap();
        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"RIFF");

        let copy = storage.save_diagnostic_copy("j1", &dest).await.unwrap();
        assert!(copy.exists());
        assert!(dest.exists());
    }
}
