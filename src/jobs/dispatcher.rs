//! FIFO task dispatcher
//!
//! A single actor task owns the queue, the handler table and the "running"
//! slot; callers talk to it through a cloneable [`DispatcherHandle`]. At most
//! one job runs at a time. Each handler runs in its own spawned task so a
//! failure or panic stays inside that job; when it settles the actor pulls the
//! next job without any external polling.

use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{record_failure, CancellationRegistry, Job, JobContext, JobHandler};
use crate::database::{DatabaseManager, JobType};
use crate::error::JobError;

/// What the dispatcher is doing right now
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub running: Option<String>,
    pub queued: Vec<String>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.queued.is_empty()
    }
}

enum Command {
    Add(Job),
    Register {
        job_type: JobType,
        handler: Arc<dyn JobHandler>,
    },
    /// Remove a not-yet-started job; replies whether it was queued
    Dequeue {
        job_id: String,
        reply: oneshot::Sender<bool>,
    },
    Finished {
        job_id: String,
    },
    Snapshot(oneshot::Sender<QueueSnapshot>),
    Shutdown,
}

/// Cloneable entry point to the dispatcher actor
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::UnboundedSender<Command>,
    cancellation: Arc<CancellationRegistry>,
    db: Option<Arc<DatabaseManager>>,
}

impl DispatcherHandle {
    /// Append a job to the queue. Returns its id.
    ///
    /// A previous cancellation of the same id is forgotten, so an explicit
    /// re-enqueue runs.
    pub fn add(&self, job_type: JobType, payload: Value) -> Result<String, JobError> {
        let job = Job::new(job_type, payload)?;
        let job_id = job.id.clone();

        self.cancellation.clear(&job_id);

        if let Some(db) = &self.db {
            let source = job.str_field("source_path").or_else(|| job.str_field("filepath"));
            if let Err(e) = db.upsert_job_queued(&job_id, job_type, source) {
                log::warn!("Failed to persist queued job {}: {}", job_id, e);
            }
        }

        self.send(Command::Add(job))?;
        log::info!("Enqueued {} job {}", job_type, job_id);
        Ok(job_id)
    }

    /// Bind the handler for a job type, replacing any previous one
    pub fn register_handler(&self, job_type: JobType, handler: Arc<dyn JobHandler>) -> Result<(), JobError> {
        self.send(Command::Register { job_type, handler })
    }

    /// Cancel a job wherever it is: drop it from the queue if it has not
    /// started, otherwise abort it in flight. Idempotent.
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        self.cancellation.cancel(job_id).await;

        let (reply, rx) = oneshot::channel();
        self.send(Command::Dequeue { job_id: job_id.to_string(), reply })?;
        if rx.await.unwrap_or(false) {
            log::info!("Removed job {} from the queue", job_id);
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<QueueSnapshot, JobError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| dispatcher_gone())
    }

    /// Stop accepting work. The running job, if any, is left to finish.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    pub fn cancellation(&self) -> &Arc<CancellationRegistry> {
        &self.cancellation
    }

    fn send(&self, command: Command) -> Result<(), JobError> {
        self.tx.send(command).map_err(|_| dispatcher_gone())
    }
}

fn dispatcher_gone() -> JobError {
    JobError::Store(anyhow::anyhow!("dispatcher is not running"))
}

/// The actor state. Only ever touched from its own task.
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Command>,
    queue: VecDeque<Job>,
    handlers: HashMap<JobType, Arc<dyn JobHandler>>,
    running: Option<String>,
    cancellation: Arc<CancellationRegistry>,
    db: Option<Arc<DatabaseManager>>,
}

impl Dispatcher {
    /// Spawn the actor on the current runtime
    pub fn start(
        cancellation: Arc<CancellationRegistry>,
        db: Option<Arc<DatabaseManager>>,
    ) -> (DispatcherHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let dispatcher = Dispatcher {
            rx,
            tx: tx.clone(),
            queue: VecDeque::new(),
            handlers: HashMap::new(),
            running: None,
            cancellation: Arc::clone(&cancellation),
            db: db.clone(),
        };

        let task = tokio::spawn(dispatcher.run());
        (DispatcherHandle { tx, cancellation, db }, task)
    }

    async fn run(mut self) {
        log::info!("Dispatcher started");

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Add(job) => self.queue.push_back(job),
                Command::Register { job_type, handler } => {
                    log::debug!("Registered handler for {}", job_type);
                    self.handlers.insert(job_type, handler);
                }
                Command::Dequeue { job_id, reply } => {
                    let before = self.queue.len();
                    self.queue.retain(|job| job.id != job_id);
                    let _ = reply.send(self.queue.len() != before);
                }
                Command::Finished { job_id } => {
                    if self.running.as_deref() == Some(job_id.as_str()) {
                        self.running = None;
                    }
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(QueueSnapshot {
                        running: self.running.clone(),
                        queued: self.queue.iter().map(|job| job.id.clone()).collect(),
                    });
                }
                Command::Shutdown => break,
            }

            self.drain();
        }

        log::info!("Dispatcher stopped with {} queued jobs dropped", self.queue.len());
    }

    /// Start the head of the queue if nothing is running
    fn drain(&mut self) {
        while self.running.is_none() {
            let Some(job) = self.queue.pop_front() else {
                return;
            };

            // Its row was already marked cancelled by the registry
            if self.cancellation.is_cancelled(&job.id) {
                log::info!("Skipping cancelled job {}", job.id);
                continue;
            }

            let Some(handler) = self.handlers.get(&job.job_type).cloned() else {
                log::warn!("No handler registered for {} jobs, dropping {}", job.job_type, job.id);
                self.reject_unhandled(&job);
                continue;
            };

            self.running = Some(job.id.clone());
            self.spawn_job(job, handler);
        }
    }

    fn reject_unhandled(&self, job: &Job) {
        let Some(db) = &self.db else { return };
        let message = format!("no handler registered for {} jobs", job.job_type);
        if let Err(e) = db.mark_job_failed(&job.id, "dispatch", &message) {
            log::warn!("Failed to record dropped job {}: {}", job.id, e);
        }
    }

    fn spawn_job(&self, job: Job, handler: Arc<dyn JobHandler>) {
        let tx = self.tx.clone();
        let cancellation = Arc::clone(&self.cancellation);
        let db = self.db.clone();

        tokio::spawn(async move {
            let job_id = job.id.clone();
            let job_type = job.job_type;
            let ctx = JobContext {
                job_id: job_id.clone(),
                token: cancellation.begin(&job_id),
                cancellation: Arc::clone(&cancellation),
            };

            log::info!("Starting {} job {}", job_type, job_id);
            let started = std::time::Instant::now();

            // Inner task: a panicking handler must not take the queue down
            let run = tokio::spawn(async move { handler.run(&job, &ctx).await });
            let outcome = match run.await {
                Ok(result) => result,
                Err(e) => Err(JobError::Store(anyhow::anyhow!("handler panicked: {}", e))),
            };

            match &outcome {
                Ok(()) => log::info!(
                    "{} job {} finished in {:.1}s", job_type, job_id, started.elapsed().as_secs_f64()
                ),
                Err(e) if e.is_cancelled() => log::info!("{} job {} cancelled", job_type, job_id),
                Err(e) => log::error!("{} job {} failed: {}", job_type, job_id, e),
            }

            if let (Err(e), Some(db)) = (&outcome, &db) {
                settle_unrecorded(db, &job_id, job_type, e);
            }

            cancellation.finish(&job_id);
            let _ = tx.send(Command::Finished { job_id });
        });
    }
}

/// Handlers record their own failures; this catches the ones that could not
fn settle_unrecorded(db: &DatabaseManager, job_id: &str, job_type: JobType, err: &JobError) {
    match db.get_job(job_id) {
        Ok(Some(job)) if !job.status.is_terminal() => record_failure(db, job_id, job_type.as_str(), err),
        Ok(_) => {}
        Err(e) => log::warn!("Failed to read job {} after failure: {}", job_id, e),
    }
}
