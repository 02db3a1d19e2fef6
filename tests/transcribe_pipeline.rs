// Integration tests: dispatcher + transcribe handler + fake worker + SQLite

mod common;

use matchscribe::config::{PipelineConfig, WorkerConfig};
use matchscribe::database::{DatabaseManager, JobStatus, JobType};
use matchscribe::AppState;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn start(worker: WorkerConfig) -> (TempDir, AppState, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let db = DatabaseManager::new(dir.path().join("test.db")).unwrap();

    let mut config = PipelineConfig::default();
    config.worker = worker;
    config.storage.base_dir = dir.path().join("data");

    let audio = dir.path().join("match.wav");
    std::fs::write(&audio, b"RIFF").unwrap();

    let state = AppState::start(db, config).unwrap();
    (dir, state, audio)
}

async fn wait_for_status(state: &AppState, job_id: &str, wanted: JobStatus) {
    for _ in 0..300 {
        let status = state.database.get_job(job_id).unwrap().map(|j| j.status);
        if status == Some(wanted) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached {}", job_id, wanted);
}

#[tokio::test]
async fn test_three_segments_then_result_completes_job() {
    let (_dir, state, audio) = start(common::three_segment_worker());

    state
        .dispatcher
        .add(
            JobType::Transcribe,
            json!({
                "id": "J1",
                "audio_path": audio,
                "duration": 4.0,
                "scenario": {"title": "Clasico", "teams": ["Real Madrid", "Barcelona"]}
            }),
        )
        .unwrap();

    wait_for_status(&state, "J1", JobStatus::Completed).await;

    let segments = state.database.get_transcript_segments("J1").unwrap();
    let indices: Vec<u32> = segments.iter().map(|s| s.segment_index).collect();
    let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(texts, vec![" Kick off", " in Madrid", " tonight."]);

    let transcript = state.database.get_transcript("J1").unwrap().unwrap();
    assert_eq!(transcript.segment_count, 3);
    assert_eq!(transcript.full_text, "Kick off in Madrid tonight.");
    assert_eq!(transcript.language.as_deref(), Some("en"));
    assert!(transcript.result_json.is_some());

    let job = state.database.get_job("J1").unwrap().unwrap();
    assert_eq!(job.progress, 100.0);
    assert!(job.first_segment_latency_ms.is_some());

    state.shutdown().await;
}

#[tokio::test]
async fn test_jobs_run_in_order_on_one_worker() {
    let (_dir, state, audio) = start(common::three_segment_worker());

    for id in ["A", "B", "C"] {
        state
            .dispatcher
            .add(JobType::Transcribe, json!({"id": id, "audio_path": audio, "duration": 4.0}))
            .unwrap();
    }

    wait_for_status(&state, "C", JobStatus::Completed).await;
    for id in ["A", "B"] {
        assert_eq!(state.database.get_job(id).unwrap().unwrap().status, JobStatus::Completed);
    }

    state.shutdown().await;
}

#[tokio::test]
async fn test_cancel_running_transcription() {
    let (_dir, state, audio) = start(common::hanging_worker());

    state
        .dispatcher
        .add(JobType::Transcribe, json!({"id": "J2", "audio_path": audio, "duration": 60.0}))
        .unwrap();
    state
        .dispatcher
        .add(JobType::Transcribe, json!({"id": "J3", "audio_path": audio, "duration": 60.0}))
        .unwrap();

    wait_for_status(&state, "J2", JobStatus::Transcribing).await;
    // Cancel only once the streamed segment has reached the handler
    for _ in 0..300 {
        if state.database.get_job("J2").unwrap().unwrap().first_segment_latency_ms.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    state.dispatcher.cancel("J2").await.unwrap();
    // Second cancel is a no-op
    state.dispatcher.cancel("J2").await.unwrap();

    wait_for_status(&state, "J2", JobStatus::Cancelled).await;

    // The queue moved on to J3 with a fresh worker; cancel it while queued or running
    state.dispatcher.cancel("J3").await.unwrap();
    wait_for_status(&state, "J3", JobStatus::Cancelled).await;

    for _ in 0..100 {
        if state.dispatcher.snapshot().await.unwrap().is_idle() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(state.dispatcher.snapshot().await.unwrap().is_idle());

    // A cancelled transcription keeps what was streamed before the cancel
    let kept = state.database.get_transcript_segments("J2").unwrap();
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].text, " Warm up");
    assert_eq!(state.database.get_job("J2").unwrap().unwrap().status, JobStatus::Cancelled);

    state.shutdown().await;
}

#[tokio::test]
async fn test_worker_crash_marks_job_failed_and_keeps_diagnostic_copy() {
    let (dir, state, audio) = start(common::sh_worker(
        r#"read -r line
id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
printf '{"type":"segment","id":%s,"data":{"start":0.0,"end":1.0,"text":" partial"}}\n' "$id"
exit 1"#,
    ));

    state
        .dispatcher
        .add(JobType::Transcribe, json!({"id": "J4", "audio_path": audio, "duration": 4.0}))
        .unwrap();

    wait_for_status(&state, "J4", JobStatus::Error).await;

    let job = state.database.get_job("J4").unwrap().unwrap();
    assert_eq!(job.error_stage.as_deref(), Some("transcribe"));
    assert!(job.error_message.unwrap().contains("exited"));

    // Partial output stays durable
    assert_eq!(state.database.get_transcript_segments("J4").unwrap().len(), 1);

    let diagnostics: Vec<_> = std::fs::read_dir(dir.path().join("data").join("diagnostics"))
        .unwrap()
        .collect();
    assert_eq!(diagnostics.len(), 1);

    state.shutdown().await;
}

#[tokio::test]
async fn test_missing_audio_fails_without_worker() {
    let (_dir, state, _audio) = start(common::sh_worker("exit 0"));

    state
        .dispatcher
        .add(JobType::Transcribe, json!({"id": "J5", "audio_path": "/nonexistent/a.wav"}))
        .unwrap();

    wait_for_status(&state, "J5", JobStatus::Error).await;
    assert!(!state.worker.is_running().await);

    state.shutdown().await;
}
