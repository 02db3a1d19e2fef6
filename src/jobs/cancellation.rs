//! Cancellation registry
//!
//! Remembers which job ids were cancelled and holds the token of the job that
//! is currently running. Cancelling the running job fires its token (observed
//! by extraction and LLM calls) and aborts its worker request.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::database::{DatabaseManager, JobStatus};
use crate::worker::WorkerChannel;

#[derive(Default)]
struct RegistryState {
    cancelled: HashSet<String>,
    active: Option<(String, CancellationToken)>,
}

pub struct CancellationRegistry {
    state: Mutex<RegistryState>,
    db: Option<Arc<DatabaseManager>>,
    worker: Option<Arc<WorkerChannel>>,
}

impl CancellationRegistry {
    pub fn new(db: Option<Arc<DatabaseManager>>, worker: Option<Arc<WorkerChannel>>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            db,
            worker,
        }
    }

    /// Cancel a job. Repeated calls for the same id have no further effect.
    ///
    /// Returns false if the id was already cancelled.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let active_token = {
            let Ok(mut state) = self.state.lock() else {
                log::error!("Cancellation registry lock poisoned");
                return false;
            };
            if !state.cancelled.insert(job_id.to_string()) {
                log::debug!("Job {} already cancelled", job_id);
                return false;
            }
            state.active.as_ref()
                .filter(|(id, _)| id == job_id)
                .map(|(_, token)| token.clone())
        };

        log::info!("Cancelling job {}", job_id);
        self.persist_cancelled(job_id);

        if let Some(token) = active_token {
            token.cancel();
            if let Some(worker) = &self.worker {
                if worker.abort(job_id).await {
                    log::info!("Terminated worker request of cancelled job {}", job_id);
                }
            }
        }

        true
    }

    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.state.lock()
            .map(|state| state.cancelled.contains(job_id))
            .unwrap_or(false)
    }

    /// Forget a cancellation so the id can be enqueued again
    pub fn clear(&self, job_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.cancelled.remove(job_id) {
                log::debug!("Cleared cancellation mark for {}", job_id);
            }
        }
    }

    /// Mark `job_id` as running and hand out its token.
    /// The token is already cancelled if the job was cancelled before it started.
    pub fn begin(&self, job_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut state) = self.state.lock() {
            if state.cancelled.contains(job_id) {
                token.cancel();
            }
            state.active = Some((job_id.to_string(), token.clone()));
        }
        token
    }

    /// The running job finished
    pub fn finish(&self, job_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            if state.active.as_ref().map(|(id, _)| id == job_id).unwrap_or(false) {
                state.active = None;
            }
        }
    }

    pub fn active_job(&self) -> Option<String> {
        self.state.lock().ok()
            .and_then(|state| state.active.as_ref().map(|(id, _)| id.clone()))
    }

    /// Best effort; a finished job keeps its terminal status
    fn persist_cancelled(&self, job_id: &str) {
        let Some(db) = &self.db else { return };

        let result = db.get_job(job_id).and_then(|job| match job {
            Some(job) if !job.status.is_terminal() => {
                db.update_job_status(job_id, JobStatus::Cancelled, None)
            }
            _ => Ok(()),
        });

        if let Err(e) = result {
            log::warn!("Failed to persist cancellation of {}: {}", job_id, e);
        }
    }
}
