// Database module
// SQLite persistence for settings, jobs, transcripts and translation runs

pub mod manager;
pub mod migrations;
pub mod models;
pub mod settings_repo;
pub mod jobs_repo;
pub mod transcripts_repo;
pub mod translations_repo;

pub use manager::DatabaseManager;
pub use models::*;
