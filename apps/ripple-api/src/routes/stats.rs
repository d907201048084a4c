use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/stats", get(stats))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub connections: usize,
    pub groups: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses((status = 200, description = "Gateway counters", body = StatsResponse)),
    tag = "Stats"
)]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let registry = state.hub.registry();
    Json(StatsResponse {
        connections: registry.connection_count(),
        groups: registry.group_count(),
    })
}
