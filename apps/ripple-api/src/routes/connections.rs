//! Live connection inspection and operator kicks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::gateway::registry::ConnectionInfo;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/connections", get(list_connections))
        .route(
            "/api/v1/connections/{connection_id}",
            delete(kick_connection),
        )
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectionResponse {
    pub connection_id: String,
    pub principal: String,
    pub groups: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

impl From<ConnectionInfo> for ConnectionResponse {
    fn from(info: ConnectionInfo) -> Self {
        let mut groups: Vec<String> = info.groups.into_iter().collect();
        groups.sort();
        Self {
            connection_id: info.connection_id,
            principal: info.principal,
            groups,
            connected_at: info.connected_at,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/connections",
    responses((status = 200, description = "All live connections", body = [ConnectionResponse])),
    tag = "Connections"
)]
pub async fn list_connections(State(state): State<AppState>) -> Json<Vec<ConnectionResponse>> {
    let mut connections: Vec<ConnectionResponse> = state
        .hub
        .registry()
        .list_connections()
        .into_iter()
        .map(ConnectionResponse::from)
        .collect();
    connections.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
    Json(connections)
}

/// Evict a connection. The registry entry goes away immediately; the session
/// loop notices its queue closing and tears the socket down.
#[utoipa::path(
    delete,
    path = "/api/v1/connections/{connection_id}",
    params(("connection_id" = String, Path, description = "Connection id")),
    responses(
        (status = 204, description = "Connection evicted"),
        (status = 404, description = "Unknown connection", body = crate::error::ApiErrorBody),
    ),
    tag = "Connections"
)]
pub async fn kick_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.hub.registry().lookup(&connection_id)?;
    state.hub.disconnect(&connection_id);
    Ok(StatusCode::NO_CONTENT)
}
