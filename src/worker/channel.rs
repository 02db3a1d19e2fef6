//! Persistent worker process with single-request correlation
//!
//! The worker is spawned lazily and kept alive between requests. Only one
//! request may be outstanding at a time: the pending slot is an `Option`, not
//! a map, and a second `send` fails with `Busy` instead of queueing. Callers
//! serialize their requests (the dispatcher runs one job at a time).
//!
//! When the process exits, the pending request is rejected and the channel
//! goes back to "not started"; the next `send` respawns it.

use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

/// Windows flag to prevent console window from appearing
#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// How long to wait for an exit status once the worker closed stdout
const EXIT_WAIT: Duration = Duration::from_secs(2);

use super::protocol::{SegmentData, WorkerMessage, WorkerRequest};
use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Non-terminal messages routed to the owner of the pending request
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress(f64),
    Segment(SegmentData),
}

/// Handle to one in-flight request.
///
/// `events` yields progress and segments in arrival order and closes when the
/// request settles, so draining it before awaiting `outcome` sees every
/// streamed message.
pub struct WorkerCall {
    pub request_id: u64,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    outcome: oneshot::Receiver<Result<Value, WorkerError>>,
}

impl WorkerCall {
    /// Wait for the terminal result of the request
    pub async fn outcome(self) -> Result<Value, WorkerError> {
        self.outcome.await
            .unwrap_or_else(|_| Err(WorkerError::Unavailable("worker channel dropped the request".to_string())))
    }
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    generation: u64,
}

struct PendingRequest {
    request_id: u64,
    owner: String,
    generation: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
    responder: oneshot::Sender<Result<Value, WorkerError>>,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value, WorkerError>) {
        // The owner may have stopped listening; nothing to do then
        let _ = self.responder.send(outcome);
    }
}

#[derive(Default)]
struct ChannelState {
    process: Option<WorkerProcess>,
    pending: Option<PendingRequest>,
}

pub struct WorkerChannel {
    config: WorkerConfig,
    state: Arc<Mutex<ChannelState>>,
    next_request_id: AtomicU64,
    next_generation: AtomicU64,
}

impl WorkerChannel {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(ChannelState::default())),
            next_request_id: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Spawn the worker unless it is already running
    pub async fn ensure_started(&self) -> Result<(), WorkerError> {
        let mut state = self.state.lock().await;
        self.ensure_started_locked(&mut state)
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.process.is_some()
    }

    /// Id of the request currently awaiting a terminal message
    pub async fn pending_request_id(&self) -> Option<u64> {
        self.state.lock().await.pending.as_ref().map(|p| p.request_id)
    }

    /// Send a request on behalf of job `owner`.
    ///
    /// Fails with `Busy` while another request is pending and with
    /// `Unavailable` if the worker stdin cannot be written.
    pub async fn send(&self, owner: &str, mut request: WorkerRequest) -> Result<WorkerCall, WorkerError> {
        let mut state = self.state.lock().await;

        if let Some(pending) = &state.pending {
            return Err(WorkerError::Busy(pending.request_id));
        }

        self.ensure_started_locked(&mut state)?;

        let Some(process) = state.process.as_mut() else {
            return Err(WorkerError::Unavailable("worker not running".to_string()));
        };

        request.id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let line = request.to_line()?;
        let generation = process.generation;

        if let Err(e) = write_line(&mut process.stdin, &line).await {
            log::warn!("Worker stdin not writable, discarding process: {}", e);
            if let Some(mut process) = state.process.take() {
                let _ = process.child.start_kill();
            }
            return Err(WorkerError::Unavailable(format!("Failed to write to worker: {}", e)));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        state.pending = Some(PendingRequest {
            request_id: request.id,
            owner: owner.to_string(),
            generation,
            events: events_tx,
            responder: outcome_tx,
        });

        log::info!(
            "Sent worker request {} for job {} ({}, {:.1}s)",
            request.id, owner, request.audio_file, request.duration
        );

        Ok(WorkerCall {
            request_id: request.id,
            events: events_rx,
            outcome: outcome_rx,
        })
    }

    /// Abort the pending request if `owner` holds it, and terminate the worker.
    ///
    /// Returns true when a request was aborted. The next `send` respawns a
    /// fresh process.
    pub async fn abort(&self, owner: &str) -> bool {
        let mut state = self.state.lock().await;

        let owns_pending = state.pending.as_ref().map(|p| p.owner == owner).unwrap_or(false);
        if !owns_pending {
            return false;
        }

        if let Some(pending) = state.pending.take() {
            log::info!("Aborting worker request {} for job {}", pending.request_id, owner);
            pending.settle(Err(WorkerError::Cancelled));
        }

        if let Some(mut process) = state.process.take() {
            if let Err(e) = process.child.start_kill() {
                log::warn!("Failed to kill worker process: {}", e);
            }
        }

        true
    }

    /// Stop the worker, rejecting any pending request
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;

        if let Some(pending) = state.pending.take() {
            pending.settle(Err(WorkerError::Unavailable("worker shut down".to_string())));
        }

        if let Some(mut process) = state.process.take() {
            log::info!("Shutting down worker process");
            let _ = process.child.start_kill();
            let _ = tokio::time::timeout(EXIT_WAIT, process.child.wait()).await;
        }
    }

    fn ensure_started_locked(&self, state: &mut ChannelState) -> Result<(), WorkerError> {
        if state.process.is_some() {
            return Ok(());
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (process, stdout, stderr) = self.spawn_process(generation)?;

        tokio::spawn(read_stdout(Arc::clone(&self.state), stdout, generation));
        tokio::spawn(forward_stderr(stderr));

        state.process = Some(process);
        Ok(())
    }

    fn spawn_process(&self, generation: u64) -> Result<(WorkerProcess, ChildStdout, ChildStderr), WorkerError> {
        log::info!(
            "Starting worker (generation {}): {} {:?} --server",
            generation, self.config.program, self.config.args
        );

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("--server")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let mut forwarded = Vec::new();
        for name in &self.config.env_passthrough {
            if let Ok(value) = std::env::var(name) {
                forwarded.push(format!("{}={}", name, value));
                cmd.env(name, value);
            }
        }
        if !forwarded.is_empty() {
            log::info!("Worker environment: {}", forwarded.join(" "));
        }

        // Hide console window on Windows
        #[cfg(target_os = "windows")]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let mut child = cmd.spawn()
            .map_err(|e| WorkerError::Spawn(format!("{}: {}", self.config.program, e)))?;

        let stdin = child.stdin.take()
            .ok_or_else(|| WorkerError::Spawn("Failed to get worker stdin".to_string()))?;
        let stdout = child.stdout.take()
            .ok_or_else(|| WorkerError::Spawn("Failed to get worker stdout".to_string()))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| WorkerError::Spawn("Failed to get worker stderr".to_string()))?;

        Ok((WorkerProcess { child, stdin, generation }, stdout, stderr))
    }
}

async fn write_line(stdin: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Route every stdout line of one worker generation until EOF
async fn read_stdout(state: Arc<Mutex<ChannelState>>, stdout: ChildStdout, generation: u64) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let mut guard = state.lock().await;
                match std::str::from_utf8(&buf) {
                    Ok(line) if line.trim().is_empty() => {}
                    Ok(line) => route_line(&mut guard, generation, line.trim_end()),
                    Err(e) => {
                        log::warn!("Worker line is not valid UTF-8 ({} bytes)", buf.len());
                        reject_pending(&mut guard, generation, WorkerError::Protocol(format!("invalid UTF-8: {}", e)));
                    }
                }
            }
            Err(e) => {
                log::warn!("Failed to read worker stdout: {}", e);
                break;
            }
        }
    }

    handle_exit(&state, generation).await;
}

/// Fail the pending request if it belongs to this worker generation
fn reject_pending(state: &mut ChannelState, generation: u64, err: WorkerError) {
    if state.pending.as_ref().map(|p| p.generation == generation).unwrap_or(false) {
        if let Some(pending) = state.pending.take() {
            pending.settle(Err(err));
        }
    }
}

fn route_line(state: &mut ChannelState, generation: u64, line: &str) {
    let message = match WorkerMessage::parse(line) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Unparseable worker line: {}", line);
            reject_pending(state, generation, e);
            return;
        }
    };

    let Some(pending) = state.pending.as_ref() else {
        log::debug!("Worker message with no pending request dropped: {:?}", message);
        return;
    };

    if pending.generation != generation {
        return;
    }

    if let Some(id) = message.id() {
        if id != pending.request_id {
            log::warn!("Dropping stale worker message for request {} (pending {})", id, pending.request_id);
            return;
        }
    }

    match message {
        WorkerMessage::Progress { progress_pct, .. } => {
            crate::perf_trace!("Worker progress {:.1}% for request {}", progress_pct, pending.request_id);
            let _ = pending.events.send(WorkerEvent::Progress(progress_pct));
        }
        WorkerMessage::Segment { data, .. } => {
            let _ = pending.events.send(WorkerEvent::Segment(data));
        }
        WorkerMessage::Result { result, .. } => {
            if let Some(pending) = state.pending.take() {
                log::info!("Worker request {} completed", pending.request_id);
                pending.settle(Ok(result));
            }
        }
        WorkerMessage::Error { message, .. } => {
            if let Some(pending) = state.pending.take() {
                log::warn!("Worker request {} failed: {}", pending.request_id, message);
                pending.settle(Err(WorkerError::Remote(message)));
            }
        }
        WorkerMessage::Other { kind, .. } => {
            log::debug!("Ignoring worker message of type '{}'", kind);
        }
    }
}

/// Stdout closed: reap the process and fail whatever it still owed us
async fn handle_exit(state: &Arc<Mutex<ChannelState>>, generation: u64) {
    let process = {
        let mut guard = state.lock().await;
        let current = guard.process.as_ref().map(|p| p.generation == generation).unwrap_or(false);
        if current { guard.process.take() } else { None }
    };

    let code = match process {
        Some(mut process) => {
            match tokio::time::timeout(EXIT_WAIT, process.child.wait()).await {
                Ok(Ok(status)) => status.code(),
                Ok(Err(e)) => {
                    log::warn!("Failed to reap worker process: {}", e);
                    None
                }
                Err(_) => {
                    log::warn!("Worker closed stdout but did not exit, killing it");
                    let _ = process.child.start_kill();
                    None
                }
            }
        }
        // Aborted or replaced; its request was already settled
        None => return,
    };

    log::warn!("Worker process (generation {}) exited with code {:?}", generation, code);

    let mut guard = state.lock().await;
    reject_pending(&mut guard, generation, WorkerError::Exited { code });
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::info!("[worker] {}", line);
    }
}
