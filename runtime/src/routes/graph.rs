use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};

use super::types::{EntityListResponse, GraphQueryParams, SelectEntityRequest};
use crate::{
    AppState,
    pipeline::{GraphView, RelationshipRecord},
};

pub fn graph_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/graph", get(get_graph))
        .route("/entities", get(list_entities))
        .route("/entities/select", post(select_entity))
        .route("/entities/{name}/relationships", get(entity_relationships))
}

/// Current view (selection applied), rendered with or without description notes.
async fn get_graph(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GraphQueryParams>,
) -> Json<GraphView> {
    Json(state.pipeline.render_view(params.notes).await)
}

async fn list_entities(State(state): State<Arc<AppState>>) -> Json<EntityListResponse> {
    Json(EntityListResponse {
        selected_entity: state.pipeline.selected_entity().await,
        entities: state.pipeline.entities().await,
    })
}

async fn select_entity(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SelectEntityRequest>,
) -> Json<GraphView> {
    let view = match request.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => state.pipeline.select_entity(name).await,
        _ => state.pipeline.clear_selection().await,
    };
    Json(view)
}

/// Relationships touching `name`. Unknown entities yield an empty list.
async fn entity_relationships(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Json<Vec<RelationshipRecord>> {
    Json(state.pipeline.relationships_for(&name).await)
}
