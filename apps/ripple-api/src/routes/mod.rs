pub mod changes;
pub mod connections;
pub mod groups;
pub mod health;
pub mod stats;

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .merge(changes::router())
        .merge(connections::router())
        .merge(groups::router())
        .merge(stats::router())
        .route("/api-docs/openapi.json", get(openapi))
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        changes::broadcast_change,
        connections::list_connections,
        connections::kick_connection,
        groups::list_groups,
        groups::group_members,
        stats::stats,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            health::HealthResponse,
            changes::BroadcastChangeRequest,
            changes::DispatchSummary,
            connections::ConnectionResponse,
            groups::GroupSummary,
            groups::GroupMember,
            groups::GroupMembersResponse,
            stats::StatsResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Changes", description = "Committed-change ingestion"),
        (name = "Connections", description = "Live connection inspection"),
        (name = "Groups", description = "Group membership inspection"),
        (name = "Stats", description = "Gateway counters"),
    )
)]
pub struct ApiDoc;
