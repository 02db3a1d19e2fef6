// Matchscribe service entry point

use anyhow::{Context, Result};
use matchscribe::database::DatabaseManager;
use matchscribe::config::PIPELINE_CONFIG_KEY;
use matchscribe::{AppState, PipelineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    matchscribe::init_logging();
    log::info!("Matchscribe starting...");

    let base_dir = PipelineConfig::default().storage.base_dir;
    let db = DatabaseManager::open_in(&base_dir).context("Database initialization failed")?;
    log::info!("Database initialized at {}", db.db_path().display());

    let config = db.load_pipeline_config().context("Failed to load pipeline configuration")?;
    if db.get_setting(PIPELINE_CONFIG_KEY)?.is_none() {
        // Store the defaults so there is a document to edit
        db.save_pipeline_config(&config).context("Failed to store default pipeline configuration")?;
    }
    let state = AppState::start(db, config)?;

    if let Err(e) = state.worker.ensure_started().await {
        // Not fatal: the channel retries on the first transcribe job
        log::warn!("Worker did not start: {}", e);
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    log::info!("Shutting down");
    state.shutdown().await;
    Ok(())
}
