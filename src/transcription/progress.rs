//! Throttled progress persistence
//!
//! A value is written when it moved by at least `min_delta` points or when
//! `min_interval_ms` passed since the last write. The first report after a
//! reset is always written.

use anyhow::Result;
use std::time::Instant;

use crate::config::ProgressPolicy;
use crate::database::DatabaseManager;

/// Last persisted value and when it was written
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThrottleState {
    pub last_pct: f64,
    pub last_at: Option<Instant>,
}

/// Decide whether `pct` observed at `now` should be persisted.
///
/// Returns the decision and the state to keep; the state only moves on a write.
pub fn decide(policy: &ProgressPolicy, state: ThrottleState, pct: f64, now: Instant) -> (bool, ThrottleState) {
    let write = match state.last_at {
        None => true,
        Some(last_at) => {
            let elapsed_ms = now.saturating_duration_since(last_at).as_millis() as u64;
            pct - state.last_pct >= policy.min_delta || elapsed_ms >= policy.min_interval_ms
        }
    };

    if write {
        (true, ThrottleState { last_pct: pct, last_at: Some(now) })
    } else {
        (false, state)
    }
}

/// Progress writer bound to the job of the current worker request
pub struct ProgressReporter {
    policy: ProgressPolicy,
    job_id: Option<String>,
    state: ThrottleState,
}

impl ProgressReporter {
    pub fn new(policy: ProgressPolicy) -> Self {
        Self {
            policy,
            job_id: None,
            state: ThrottleState::default(),
        }
    }

    /// Start fresh for a new worker request
    pub fn reset(&mut self, job_id: &str) {
        self.job_id = Some(job_id.to_string());
        self.state = ThrottleState::default();
    }

    /// Persist `pct` for the bound job if the throttle lets it through
    pub fn report(&mut self, db: &DatabaseManager, pct: f64, now: Instant) -> Result<bool> {
        let Some(job_id) = self.job_id.as_deref() else {
            return Ok(false);
        };

        let (write, next) = decide(&self.policy, self.state, pct, now);
        if !write {
            crate::perf_trace!("Progress {:.1}% for {} throttled", pct, job_id);
            return Ok(false);
        }

        db.update_job_progress(job_id, pct)?;
        self.state = next;
        crate::perf_debug!("Progress {:.1}% persisted for {}", pct, job_id);
        Ok(true)
    }
}
