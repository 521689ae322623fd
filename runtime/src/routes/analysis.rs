use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::types::{AnalyzeRequest, AnalyzeResponse, StatusResponse};
use crate::{
    AppState,
    pipeline::{AnalyzeOptions, FileTextSource, InlineTextSource, TextSource},
    storage::StateStorage,
};

pub fn analysis_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analyze", post(start_analysis))
        .route("/analyze/cancel", post(cancel_analysis))
        .route("/status", get(status))
}

async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), (StatusCode, String)> {
    // Claimed before anything is spawned so a second request sees the run immediately.
    let Some(claim) = state.pipeline.try_claim_run() else {
        return Ok((
            StatusCode::CONFLICT,
            Json(AnalyzeResponse {
                status: "busy".to_string(),
                message: "An analysis is already running.".to_string(),
            }),
        ));
    };

    let source: Box<dyn TextSource> = match (request.text, request.path) {
        (Some(text), _) => {
            let source_id = request.source_id.unwrap_or_else(|| "inline".to_string());
            Box::new(InlineTextSource::new(source_id, text))
        }
        (None, Some(path)) => {
            let resolved = resolve_input_path(&state.input_dir(), &path).map_err(|msg| {
                (StatusCode::BAD_REQUEST, format!("invalid path '{path}': {msg}"))
            })?;
            Box::new(FileTextSource::new(resolved))
        }
        (None, None) => {
            return Err((
                StatusCode::BAD_REQUEST,
                "either `text` or `path` is required".to_string(),
            ));
        }
    };

    let options = AnalyzeOptions {
        summarize: request.summarize,
    };
    let background_state = state.clone();

    tokio::spawn(async move {
        let pipeline = background_state.pipeline.clone();
        match pipeline
            .analyze_claimed(claim, source.as_ref(), options, CancellationToken::new())
            .await
        {
            Ok(report) => info!(
                run_id = %report.run_id,
                chunks = report.chunks_completed,
                records = report.records_added,
                "background analysis finished"
            ),
            Err(err) => warn!(error = %err, "background analysis failed"),
        }

        // Partial results are kept, so persist in both cases.
        let snapshot = pipeline.export().await;
        if let Err(err) = background_state.session_store.set(snapshot).await {
            error!(error = %err, "failed to stage session snapshot");
        } else if let Err(err) = background_state.session_store.sync_if_dirty().await {
            error!(error = %err, "failed to persist session snapshot");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            status: "accepted".to_string(),
            message: "Analysis started. Follow /events for progress.".to_string(),
        }),
    ))
}

async fn cancel_analysis(State(state): State<Arc<AppState>>) -> Json<AnalyzeResponse> {
    let cancelled = state.pipeline.cancel_current().await;
    Json(AnalyzeResponse {
        status: if cancelled { "cancelling" } else { "idle" }.to_string(),
        message: if cancelled {
            "Cancellation requested.".to_string()
        } else {
            "No analysis is running.".to_string()
        },
    })
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let pipeline = &state.pipeline;
    let snapshot = pipeline.export().await;
    Json(StatusResponse {
        phase: pipeline.phase(),
        running: pipeline.is_running(),
        include_descriptions: pipeline.include_descriptions(),
        entity_count: snapshot.entities.len(),
        record_count: snapshot.records.len(),
        selected_entity: snapshot.selected_entity,
        last_stats: pipeline.last_stats().await,
    })
}

/// Joins `requested` onto `base`, refusing absolute paths and parent traversal.
fn resolve_input_path(base: &Path, requested: &str) -> Result<PathBuf, &'static str> {
    let requested = Path::new(requested);
    if requested.as_os_str().is_empty() {
        return Err("empty path");
    }
    if !requested
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err("path must stay inside the input directory");
    }
    Ok(base.join(requested))
}
