//! Committed-change ingestion for the business-logic layer.
//!
//! Callers post here after the underlying change is durably committed; the
//! event is stamped at receipt and fanned out once, never stored.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use ripple_common::events::EventName;
use ripple_common::{ChangeEvent, ChangeKind};

use crate::auth::Principal;
use crate::error::{ApiError, FieldError};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/changes", post(broadcast_change))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastChangeRequest {
    /// One of `create`, `update`, `delete`.
    #[schema(value_type = String, example = "update")]
    pub kind: ChangeKind,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub new_data: Option<Value>,
    /// Defaults to the caller's token subject.
    #[serde(default)]
    pub originator: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DispatchSummary {
    pub event: String,
    pub attempted: usize,
    pub delivered: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/changes",
    request_body = BroadcastChangeRequest,
    responses(
        (status = 202, description = "Change accepted and dispatched best-effort", body = DispatchSummary),
        (status = 400, description = "Validation failed", body = crate::error::ApiErrorBody),
        (status = 401, description = "Invalid token", body = crate::error::ApiErrorBody),
    ),
    tag = "Changes"
)]
pub async fn broadcast_change(
    Principal(principal): Principal,
    State(state): State<AppState>,
    Json(body): Json<BroadcastChangeRequest>,
) -> Result<(StatusCode, Json<DispatchSummary>), ApiError> {
    let mut errors = Vec::new();
    if body.entity_type.trim().is_empty() {
        errors.push(FieldError {
            field: "entity_type".to_string(),
            message: "entity_type is required".to_string(),
        });
    }
    if body.entity_id.trim().is_empty() {
        errors.push(FieldError {
            field: "entity_id".to_string(),
            message: "entity_id is required".to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let originator = body
        .originator
        .filter(|o| !o.is_empty())
        .unwrap_or(principal);
    let change = ChangeEvent::new(
        body.kind,
        body.entity_type,
        body.entity_id,
        body.new_data,
        originator,
    );
    let report = state.hub.broadcast_change(change);

    Ok((
        StatusCode::ACCEPTED,
        Json(DispatchSummary {
            event: EventName::DATA_CHANGED.to_string(),
            attempted: report.attempted,
            delivered: report.delivered,
        }),
    ))
}
