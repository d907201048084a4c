//! Read-only group membership inspection.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/groups", get(list_groups))
        .route("/api/v1/groups/{group_name}/members", get(group_members))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupSummary {
    pub name: String,
    pub members: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupMember {
    pub connection_id: String,
    pub principal: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GroupMembersResponse {
    pub group: String,
    pub members: Vec<GroupMember>,
}

#[utoipa::path(
    get,
    path = "/api/v1/groups",
    responses((status = 200, description = "Groups with at least one member", body = [GroupSummary])),
    tag = "Groups"
)]
pub async fn list_groups(State(state): State<AppState>) -> Json<Vec<GroupSummary>> {
    let mut groups: Vec<GroupSummary> = state
        .hub
        .registry()
        .group_sizes()
        .into_iter()
        .map(|(name, members)| GroupSummary { name, members })
        .collect();
    groups.sort_by(|a, b| a.name.cmp(&b.name));
    Json(groups)
}

/// A group nobody has joined is indistinguishable from a non-existent one:
/// both answer with an empty member list.
#[utoipa::path(
    get,
    path = "/api/v1/groups/{group_name}/members",
    params(("group_name" = String, Path, description = "Group name")),
    responses((status = 200, description = "Current members of the group", body = GroupMembersResponse)),
    tag = "Groups"
)]
pub async fn group_members(
    State(state): State<AppState>,
    Path(group_name): Path<String>,
) -> Json<GroupMembersResponse> {
    let mut members: Vec<GroupMember> = state
        .hub
        .registry()
        .member_infos(&group_name)
        .into_iter()
        .map(|info| GroupMember {
            connection_id: info.connection_id,
            principal: info.principal,
            connected_at: info.connected_at,
        })
        .collect();
    members.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));
    Json(GroupMembersResponse {
        group: group_name,
        members,
    })
}
