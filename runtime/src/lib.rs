use std::{path::PathBuf, sync::Arc};

pub mod ai;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod storage;

use ai::GenerationSettings;
use config::AppConfig;
use pipeline::{BroadcastProgressSink, Pipeline, SessionSnapshot};
use storage::{JsonStateStorage, StoragesStatus};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
    pub events: BroadcastProgressSink,
    pub session_store: Arc<JsonStateStorage<SessionSnapshot>>,
    pub settings_store: Arc<JsonStateStorage<GenerationSettings>>,
    pub storages_status: StoragesStatus,
}

impl AppState {
    /// Directory that `path` inputs of analysis requests are resolved against.
    pub fn input_dir(&self) -> PathBuf {
        PathBuf::from(&self.config.working_dir).join("input")
    }
}
