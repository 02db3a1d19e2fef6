// Translation runs repository

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{TranslationRun, TranslationStatus};
use super::DatabaseManager;

impl DatabaseManager {
    /// Create a run in `processing` state, or restart an existing one
    pub fn start_translation_run(
        &self,
        run_id: &str,
        source_job_id: &str,
        target_language: &str,
        provider: Option<&str>,
        total_chunks: u32,
    ) -> Result<()> {
        self.with_connection(|conn| {
            start_translation_run_impl(conn, run_id, source_job_id, target_language, provider, total_chunks)
        })
    }

    /// Persist the completed chunk count and percentage of a processing run
    pub fn update_translation_progress(&self, run_id: &str, completed_chunks: u32, progress: u32) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                UPDATE translation_runs SET
                    completed_chunks = ?1,
                    progress = MAX(progress, ?2),
                    updated_at = datetime('now')
                WHERE id = ?3 AND status = 'processing'
                "#,
                params![completed_chunks, progress.min(100), run_id],
            ).context("Failed to update translation progress")?;
            Ok(())
        })
    }

    /// Store the merged content and mark the run completed
    pub fn complete_translation_run(&self, run_id: &str, content: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                UPDATE translation_runs SET
                    status = 'completed',
                    progress = 100,
                    completed_chunks = total_chunks,
                    content = ?1,
                    error_message = NULL,
                    updated_at = datetime('now')
                WHERE id = ?2
                "#,
                params![content, run_id],
            ).context("Failed to complete translation run")?;
            Ok(())
        })
    }

    /// Stop a run as `error` or `cancelled`; progress stays where it was
    pub fn fail_translation_run(&self, run_id: &str, status: TranslationStatus, message: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                UPDATE translation_runs SET
                    status = ?1,
                    error_message = ?2,
                    updated_at = datetime('now')
                WHERE id = ?3
                "#,
                params![status.as_str(), message, run_id],
            ).context("Failed to fail translation run")?;
            Ok(())
        })
    }

    pub fn get_translation_run(&self, run_id: &str) -> Result<Option<TranslationRun>> {
        self.with_connection(|conn| {
            get_translation_run_impl(conn, run_id)
        })
    }
}

fn start_translation_run_impl(
    conn: &Connection,
    run_id: &str,
    source_job_id: &str,
    target_language: &str,
    provider: Option<&str>,
    total_chunks: u32,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO translation_runs (id, source_job_id, target_language, provider, status,
                                      progress, total_chunks, completed_chunks)
        VALUES (?1, ?2, ?3, ?4, 'processing', 0, ?5, 0)
        ON CONFLICT(id) DO UPDATE SET
            source_job_id = excluded.source_job_id,
            target_language = excluded.target_language,
            provider = excluded.provider,
            status = 'processing',
            progress = 0,
            total_chunks = excluded.total_chunks,
            completed_chunks = 0,
            content = NULL,
            error_message = NULL,
            updated_at = datetime('now')
        "#,
        params![run_id, source_job_id, target_language, provider, total_chunks],
    ).context("Failed to start translation run")?;

    Ok(())
}

fn get_translation_run_impl(conn: &Connection, run_id: &str) -> Result<Option<TranslationRun>> {
    let row = conn.query_row(
        r#"
        SELECT id, source_job_id, target_language, provider, status, progress,
               total_chunks, completed_chunks, content, error_message, created_at, updated_at
        FROM translation_runs WHERE id = ?
        "#,
        params![run_id],
        |row| {
            Ok((
                TranslationRun {
                    id: row.get(0)?,
                    source_job_id: row.get(1)?,
                    target_language: row.get(2)?,
                    provider: row.get(3)?,
                    status: TranslationStatus::Processing,
                    progress: row.get(5)?,
                    total_chunks: row.get(6)?,
                    completed_chunks: row.get(7)?,
                    content: row.get(8)?,
                    error_message: row.get(9)?,
                    created_at: row.get(10)?,
                    updated_at: row.get(11)?,
                },
                row.get::<_, String>(4)?,
            ))
        },
    ).optional().context("Failed to query translation run")?;

    match row {
        Some((mut run, status)) => {
            run.status = status.parse().map_err(anyhow::Error::msg)?;
            Ok(Some(run))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn create_test_db() -> (TempDir, DatabaseManager) {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn test_run_progress_and_completion() {
        let (_dir, db) = create_test_db();

        db.start_translation_run("run_1", "job_1", "Chinese", Some("ollama"), 4).unwrap();
        db.update_translation_progress("run_1", 1, 25).unwrap();
        db.update_translation_progress("run_1", 2, 50).unwrap();

        let run = db.get_translation_run("run_1").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Processing);
        assert_eq!(run.progress, 50);
        assert_eq!(run.completed_chunks, 2);

        db.complete_translation_run("run_1", "[]").unwrap();
        let run = db.get_translation_run("run_1").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Completed);
        assert_eq!(run.progress, 100);
        assert_eq!(run.completed_chunks, 4);
        assert_eq!(run.content.as_deref(), Some("[]"));
    }

    #[test]
    fn test_failed_run_freezes_progress() {
        let (_dir, db) = create_test_db();

        db.start_translation_run("run_2", "job_2", "English", None, 3).unwrap();
        db.update_translation_progress("run_2", 1, 33).unwrap();
        db.fail_translation_run("run_2", TranslationStatus::Error, "chunk 2 failed").unwrap();
        db.update_translation_progress("run_2", 2, 67).unwrap();

        let run = db.get_translation_run("run_2").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Error);
        assert_eq!(run.progress, 33);
        assert_eq!(run.completed_chunks, 1);
        assert_eq!(run.error_message.as_deref(), Some("chunk 2 failed"));
    }

    #[test]
    fn test_restart_resets_run() {
        let (_dir, db) = create_test_db();

        db.start_translation_run("run_3", "job_3", "Chinese", None, 2).unwrap();
        db.fail_translation_run("run_3", TranslationStatus::Cancelled, "cancelled").unwrap();
        db.start_translation_run("run_3", "job_3", "Chinese", None, 5).unwrap();

        let run = db.get_translation_run("run_3").unwrap().unwrap();
        assert_eq!(run.status, TranslationStatus::Processing);
        assert_eq!(run.total_chunks, 5);
        assert!(run.error_message.is_none());
        assert!(db.get_translation_run("missing").unwrap().is_none());
    }
}
