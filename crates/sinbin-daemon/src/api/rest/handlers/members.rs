//! Membership handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use crate::moderation::RejoinOutcome;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sinbin_types::{CommunityId, EntityId, Role};

/// Rejoin notification
#[derive(Debug, Deserialize)]
pub struct RejoinRequest {
    pub entity: EntityId,
}

/// Rejoin response
#[derive(Debug, Serialize)]
pub struct RejoinResponse {
    pub entity: EntityId,
    pub outcome: RejoinOutcome,
}

/// A member joined a community again
pub async fn member_rejoined(
    State(state): State<AppState>,
    Json(req): Json<RejoinRequest>,
) -> Json<RejoinResponse> {
    let outcome = state.manager.member_rejoined(req.entity).await;
    Json(RejoinResponse {
        entity: req.entity,
        outcome,
    })
}

/// Look up a community role by name
pub async fn find_role(
    State(state): State<AppState>,
    Path((community_id, name)): Path<(u64, String)>,
) -> ApiResult<Json<Role>> {
    let community_id = CommunityId::new(community_id);
    state
        .manager
        .find_role(community_id, &name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Role {name:?} not found in {community_id}")))
}
