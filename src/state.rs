// Service state: wires storage, the worker, the LLM engine and the dispatcher

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::PipelineConfig;
use crate::database::{DatabaseManager, JobType};
use crate::jobs::handlers::{BurnSubtitleHandler, ExtractHandler, TranscribeHandler, TranslateHandler};
use crate::jobs::{CancellationRegistry, Dispatcher, DispatcherHandle};
use crate::llm_engine::LlmEngine;
use crate::media::{FfmpegExtractor, LocalStorage};
use crate::worker::WorkerChannel;

pub struct AppState {
    /// Database manager for SQLite persistence
    pub database: Arc<DatabaseManager>,
    pub config: PipelineConfig,
    /// The persistent speech-recognition worker
    pub worker: Arc<WorkerChannel>,
    pub cancellation: Arc<CancellationRegistry>,
    /// LLM engine used by translation jobs
    pub llm_engine: Arc<LlmEngine>,
    pub storage: LocalStorage,
    pub dispatcher: DispatcherHandle,
    dispatcher_task: JoinHandle<()>,
}

impl AppState {
    /// Build every collaborator and start the dispatcher with all four
    /// handlers registered. Must run inside a tokio runtime.
    pub fn start(database: DatabaseManager, config: PipelineConfig) -> Result<Self> {
        let database = Arc::new(database);
        let storage = LocalStorage::new(config.storage.base_dir.clone());
        let worker = Arc::new(WorkerChannel::new(config.worker.clone()));
        let cancellation = Arc::new(CancellationRegistry::new(
            Some(Arc::clone(&database)),
            Some(Arc::clone(&worker)),
        ));
        let llm_engine = Arc::new(LlmEngine::from_config(&config));

        let (dispatcher, dispatcher_task) = Dispatcher::start(Arc::clone(&cancellation), Some(Arc::clone(&database)));

        let extractor = Arc::new(FfmpegExtractor::new(config.storage.ffmpeg_path.clone()));
        dispatcher
            .register_handler(
                JobType::Extract,
                Arc::new(ExtractHandler::new(Arc::clone(&database), storage.clone(), extractor)),
            )
            .context("Failed to register extract handler")?;
        dispatcher
            .register_handler(
                JobType::Transcribe,
                Arc::new(TranscribeHandler::new(
                    Arc::clone(&database),
                    Arc::clone(&worker),
                    storage.clone(),
                    config.sink,
                    config.progress,
                )),
            )
            .context("Failed to register transcribe handler")?;
        dispatcher
            .register_handler(
                JobType::Translate,
                Arc::new(TranslateHandler::new(
                    Arc::clone(&database),
                    Arc::clone(&llm_engine),
                    config.chunking,
                    config.translation.clone(),
                )),
            )
            .context("Failed to register translate handler")?;
        dispatcher
            .register_handler(
                JobType::BurnSubtitle,
                Arc::new(BurnSubtitleHandler::new(
                    Arc::clone(&database),
                    storage.clone(),
                    config.storage.ffmpeg_path.clone(),
                )),
            )
            .context("Failed to register burn_subtitle handler")?;

        log::info!("Pipeline ready, storage at {}", storage.base_dir().display());

        Ok(Self {
            database,
            config,
            worker,
            cancellation,
            llm_engine,
            storage,
            dispatcher,
            dispatcher_task,
        })
    }

    /// Stop the dispatcher, then the worker and the LLM providers
    pub async fn shutdown(self) {
        self.dispatcher.shutdown();
        if let Err(e) = self.dispatcher_task.await {
            log::warn!("Dispatcher task ended abnormally: {}", e);
        }
        self.worker.shutdown().await;
        if let Err(e) = self.llm_engine.shutdown().await {
            log::warn!("Failed to shut down LLM providers: {}", e);
        }
        log::info!("Pipeline stopped");
    }
}
