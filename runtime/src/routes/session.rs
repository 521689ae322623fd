use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tracing::info;

use crate::{
    AppState,
    ai::GenerationSettings,
    pipeline::SessionSnapshot,
    storage::StateStorage,
};

pub fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session/export", get(export_session))
        .route("/session/import", post(import_session))
        .route("/settings", get(get_settings).put(put_settings))
}

async fn export_session(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    Json(state.pipeline.export().await)
}

async fn import_session(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<SessionSnapshot>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    // Holding the claim keeps a new analysis from starting mid-import.
    let Some(_claim) = state.pipeline.try_claim_run() else {
        return Err((
            StatusCode::CONFLICT,
            "cannot import a session while an analysis is running".to_string(),
        ));
    };

    state.pipeline.import(snapshot).await;
    let restored = state.pipeline.export().await;
    info!(
        records = restored.records.len(),
        entities = restored.entities.len(),
        "session imported"
    );

    state
        .session_store
        .set(restored.clone())
        .await
        .map_err(internal_error)?;
    state
        .session_store
        .sync_if_dirty()
        .await
        .map_err(internal_error)?;
    Ok(Json(restored))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<GenerationSettings> {
    Json(state.pipeline.settings().await)
}

/// Stores new settings. An active session picks them up at its next chunk boundary.
async fn put_settings(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<GenerationSettings>,
) -> Result<Json<GenerationSettings>, (StatusCode, String)> {
    if !settings.temperature.is_finite() || settings.temperature < 0.0 {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("invalid temperature {}", settings.temperature),
        ));
    }
    if settings.top_k == 0 {
        return Err((StatusCode::BAD_REQUEST, "top_k must be at least 1".to_string()));
    }

    state.pipeline.update_settings(settings).await;
    state
        .settings_store
        .set(settings)
        .await
        .map_err(internal_error)?;
    state
        .settings_store
        .sync_if_dirty()
        .await
        .map_err(internal_error)?;
    Ok(Json(settings))
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("failed to persist state: {err}"),
    )
}
