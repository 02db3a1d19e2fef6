// Jobs repository
// Keyed status, progress and artifact bookkeeping for queued jobs

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{JobRecord, JobStatus, JobType};
use super::DatabaseManager;

impl DatabaseManager {
    /// Create the job row, or reset an existing one back to `queued`
    pub fn upsert_job_queued(&self, job_id: &str, job_type: JobType, source_path: Option<&str>) -> Result<()> {
        self.with_connection(|conn| {
            upsert_job_queued_impl(conn, job_id, job_type, source_path)
        })
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.with_connection(|conn| {
            get_job_impl(conn, job_id)
        })
    }

    /// Set the job status, recording the stage that produced it
    pub fn update_job_status(&self, job_id: &str, status: JobStatus, stage: Option<&str>) -> Result<()> {
        self.with_connection(|conn| {
            update_job_status_impl(conn, job_id, status, stage)
        })
    }

    /// Persist a progress percentage; ignored once the job reached a terminal status
    pub fn update_job_progress(&self, job_id: &str, progress: f64) -> Result<()> {
        self.with_connection(|conn| {
            update_job_progress_impl(conn, job_id, progress)
        })
    }

    /// Record the canonical audio artifact of a job
    pub fn set_job_audio(&self, job_id: &str, audio_path: &str, duration: f64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"UPDATE jobs SET audio_path = ?1, duration = ?2, updated_at = datetime('now')
                   WHERE id = ?3"#,
                params![audio_path, duration, job_id],
            ).context("Failed to set job audio")?;
            Ok(())
        })
    }

    /// Time from worker request to the first streamed segment
    pub fn set_first_segment_latency(&self, job_id: &str, latency_ms: i64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"UPDATE jobs SET first_segment_latency_ms = ?1, updated_at = datetime('now')
                   WHERE id = ?2"#,
                params![latency_ms, job_id],
            ).context("Failed to set first segment latency")?;
            Ok(())
        })
    }

    /// Mark a job as failed, keeping the failing stage and message for operators
    pub fn mark_job_failed(&self, job_id: &str, stage: &str, message: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"UPDATE jobs SET status = 'error', error_stage = ?1, error_message = ?2,
                   updated_at = datetime('now') WHERE id = ?3"#,
                params![stage, message, job_id],
            ).context("Failed to mark job failed")?;
            Ok(())
        })
    }
}

fn upsert_job_queued_impl(conn: &Connection, job_id: &str, job_type: JobType, source_path: Option<&str>) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO jobs (id, job_type, status, progress, source_path)
        VALUES (?1, ?2, 'queued', 0, ?3)
        ON CONFLICT(id) DO UPDATE SET
            job_type = excluded.job_type,
            status = 'queued',
            stage = NULL,
            progress = 0,
            source_path = COALESCE(excluded.source_path, jobs.source_path),
            error_stage = NULL,
            error_message = NULL,
            updated_at = datetime('now')
        "#,
        params![job_id, job_type.as_str(), source_path],
    ).context("Failed to upsert queued job")?;

    Ok(())
}

fn get_job_impl(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>> {
    let row = conn.query_row(
        r#"
        SELECT id, job_type, status, stage, progress, source_path, audio_path, duration,
               first_segment_latency_ms, error_stage, error_message, created_at, updated_at
        FROM jobs WHERE id = ?
        "#,
        params![job_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<i64>>(8)?,
                row.get::<_, Option<String>>(9)?,
                row.get::<_, Option<String>>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, String>(12)?,
            ))
        },
    ).optional().context("Failed to query job")?;

    let Some((id, job_type, status, stage, progress, source_path, audio_path, duration,
              first_segment_latency_ms, error_stage, error_message, created_at, updated_at)) = row
    else {
        return Ok(None);
    };

    Ok(Some(JobRecord {
        id,
        job_type: job_type.parse().map_err(anyhow::Error::msg)?,
        status: status.parse().map_err(anyhow::Error::msg)?,
        stage,
        progress,
        source_path,
        audio_path,
        duration,
        first_segment_latency_ms,
        error_stage,
        error_message,
        created_at,
        updated_at,
    }))
}

fn update_job_status_impl(conn: &Connection, job_id: &str, status: JobStatus, stage: Option<&str>) -> Result<()> {
    let progress_reset = match status {
        JobStatus::Completed => Some(100.0),
        _ => None,
    };

    conn.execute(
        r#"
        UPDATE jobs SET
            status = ?1,
            stage = COALESCE(?2, stage),
            progress = COALESCE(?3, progress),
            updated_at = datetime('now')
        WHERE id = ?4
        "#,
        params![status.as_str(), stage, progress_reset, job_id],
    ).context("Failed to update job status")?;

    Ok(())
}

fn update_job_progress_impl(conn: &Connection, job_id: &str, progress: f64) -> Result<()> {
    conn.execute(
        r#"
        UPDATE jobs SET progress = ?1, updated_at = datetime('now')
        WHERE id = ?2 AND status NOT IN ('completed', 'error', 'cancelled')
        "#,
        params![progress.clamp(0.0, 100.0), job_id],
    ).context("Failed to update job progress")?;

    Ok(())
}
