use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};

use super::types::HealthResponse;
use crate::{AppState, storage::StoragesStatus};

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(health_report(state.storages_status))
}

fn health_report(storages: StoragesStatus) -> HealthResponse {
    HealthResponse {
        status: if storages == StoragesStatus::Initialized {
            "ok"
        } else {
            "degraded"
        }
        .to_string(),
        storages,
    }
}
