use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{
    ai::SessionStats,
    pipeline::{EntityRecord, RunPhase},
    storage::StoragesStatus,
};

#[derive(Clone, Debug, Default, Deserialize, TS)]
#[ts(export)]
pub struct AnalyzeRequest {
    /// Inline document text. Takes precedence over `path`.
    #[serde(default)]
    pub text: Option<String>,
    /// File name relative to the input directory.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub summarize: bool,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct AnalyzeResponse {
    pub status: String,
    pub message: String,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    pub phase: RunPhase,
    pub running: bool,
    pub include_descriptions: bool,
    pub entity_count: usize,
    pub record_count: usize,
    pub selected_entity: Option<String>,
    pub last_stats: Option<SessionStats>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct EntityListResponse {
    pub selected_entity: Option<String>,
    pub entities: Vec<EntityRecord>,
}

#[derive(Clone, Debug, Default, Deserialize, TS)]
#[ts(export)]
pub struct SelectEntityRequest {
    /// `None` clears the selection.
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct GraphQueryParams {
    #[serde(default)]
    pub notes: Option<bool>,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
    pub storages: StoragesStatus,
}
