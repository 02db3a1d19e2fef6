// Transcripts repository
// Handles the working transcript and its segments for transcription jobs

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{Transcript, TranscriptSegment};
use super::DatabaseManager;

impl DatabaseManager {
    /// Clear any previous transcript for a job and create an empty one
    pub fn reset_transcript(&self, job_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            reset_transcript_impl(conn, job_id)
        })
    }

    /// Replace all segments of a job's transcript, together with its concatenated text
    pub fn replace_transcript_segments(&self, job_id: &str, segments: &[TranscriptSegment], full_text: &str) -> Result<()> {
        self.with_connection(|conn| {
            replace_transcript_segments_impl(conn, job_id, segments, full_text)
        })
    }

    /// Store the final structured result returned by the worker
    pub fn save_transcript_result(&self, job_id: &str, result_json: &str, language: Option<&str>) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO transcripts (job_id, result_json, language)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(job_id) DO UPDATE SET
                    result_json = excluded.result_json,
                    language = COALESCE(excluded.language, transcripts.language),
                    updated_at = datetime('now')
                "#,
                params![job_id, result_json, language],
            ).context("Failed to save transcript result")?;
            Ok(())
        })
    }

    /// Get all segments for a job, ordered by index
    pub fn get_transcript_segments(&self, job_id: &str) -> Result<Vec<TranscriptSegment>> {
        self.with_connection(|conn| {
            get_transcript_segments_impl(conn, job_id)
        })
    }

    pub fn get_transcript(&self, job_id: &str) -> Result<Option<Transcript>> {
        self.with_connection(|conn| {
            get_transcript_impl(conn, job_id)
        })
    }
}

fn reset_transcript_impl(conn: &Connection, job_id: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()
        .context("Failed to start transaction for reset_transcript")?;

    // Segments go with the parent row
    tx.execute(
        "DELETE FROM transcripts WHERE job_id = ?",
        params![job_id],
    ).context("Failed to delete old transcript")?;

    tx.execute(
        "INSERT INTO transcripts (job_id) VALUES (?)",
        params![job_id],
    ).context("Failed to create transcript")?;

    tx.commit().context("Failed to commit reset_transcript")?;
    Ok(())
}

fn replace_transcript_segments_impl(
    conn: &Connection,
    job_id: &str,
    segments: &[TranscriptSegment],
    full_text: &str,
) -> Result<()> {
    let tx = conn.unchecked_transaction()
        .context("Failed to start transaction for replace_transcript_segments")?;

    tx.execute(
        r#"
        INSERT INTO transcripts (job_id, full_text, segment_count)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(job_id) DO UPDATE SET
            full_text = excluded.full_text,
            segment_count = excluded.segment_count,
            updated_at = datetime('now')
        "#,
        params![job_id, full_text, segments.len() as i64],
    ).context("Failed to upsert transcript")?;

    tx.execute(
        "DELETE FROM transcript_segments WHERE job_id = ?",
        params![job_id],
    ).context("Failed to delete old transcript segments")?;

    {
        let mut stmt = tx.prepare(
            r#"
            INSERT INTO transcript_segments (job_id, segment_index, start_time, end_time, text)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#
        ).context("Failed to prepare segment insert")?;

        for segment in segments {
            stmt.execute(params![
                job_id,
                segment.segment_index,
                segment.start_time,
                segment.end_time,
                segment.text,
            ]).context("Failed to insert transcript segment")?;
        }
    }

    tx.commit().context("Failed to commit replace_transcript_segments")?;
    Ok(())
}

fn get_transcript_segments_impl(conn: &Connection, job_id: &str) -> Result<Vec<TranscriptSegment>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT segment_index, start_time, end_time, text
        FROM transcript_segments
        WHERE job_id = ?
        ORDER BY segment_index ASC
        "#
    ).context("Failed to prepare get_transcript_segments query")?;

    let segments = stmt.query_map(params![job_id], |row| {
        Ok(TranscriptSegment {
            segment_index: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            text: row.get(3)?,
        })
    }).context("Failed to query transcript segments")?;

    segments.collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect transcript segments")
}

fn get_transcript_impl(conn: &Connection, job_id: &str) -> Result<Option<Transcript>> {
    conn.query_row(
        r#"
        SELECT job_id, full_text, segment_count, language, result_json, updated_at
        FROM transcripts WHERE job_id = ?
        "#,
        params![job_id],
        |row| {
            Ok(Transcript {
                job_id: row.get(0)?,
                full_text: row.get(1)?,
                segment_count: row.get(2)?,
                language: row.get(3)?,
                result_json: row.get(4)?,
                updated_at: row.get(5)?,
            })
        },
    ).optional().context("Failed to query transcript")
}
