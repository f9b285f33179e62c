//! Punishment handlers

use crate::api::rest::state::AppState;
use crate::error::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sinbin_types::{BatchOutcome, EntityId, PunishmentRecord};
use std::collections::BTreeSet;
use std::time::Duration;

/// Punish request
#[derive(Debug, Deserialize)]
pub struct PunishRequest {
    pub entities: BTreeSet<EntityId>,
    pub duration_secs: u64,
    /// Who issued the command
    #[serde(default)]
    pub moderator: Option<String>,
}

/// Lift request
#[derive(Debug, Deserialize)]
pub struct LiftRequest {
    pub entities: BTreeSet<EntityId>,
    #[serde(default)]
    pub moderator: Option<String>,
}

/// Per-entity report of a batch operation
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub outcome: BatchOutcome,

    /// Operator to follow up on failed targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
}

impl BatchResponse {
    fn new(outcome: BatchOutcome, state: &AppState) -> Self {
        let escalate_to = outcome
            .has_failures()
            .then(|| state.manager.operator_id().map(str::to_string))
            .flatten();
        Self {
            outcome,
            escalate_to,
        }
    }
}

/// Punish one or more members
pub async fn create_punishment(
    State(state): State<AppState>,
    Json(req): Json<PunishRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let outcome = state
        .manager
        .punish(
            &req.entities,
            Duration::from_secs(req.duration_secs),
            req.moderator.as_deref(),
        )
        .await?;

    Ok(Json(BatchResponse::new(outcome, &state)))
}

/// Lift punishments
pub async fn lift_punishment(
    State(state): State<AppState>,
    Json(req): Json<LiftRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let outcome = state
        .manager
        .lift(&req.entities, req.moderator.as_deref())
        .await?;

    Ok(Json(BatchResponse::new(outcome, &state)))
}

/// List active punishments
pub async fn list_punishments(State(state): State<AppState>) -> Json<Vec<PunishmentRecord>> {
    Json(state.manager.list().await)
}

/// Get the active punishment of one member
pub async fn get_punishment(
    State(state): State<AppState>,
    Path((community_id, user_id)): Path<(u64, u64)>,
) -> ApiResult<Json<PunishmentRecord>> {
    let entity = EntityId::new(community_id, user_id);
    let expires_at = state
        .manager
        .is_punished(&entity)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("No active punishment for {}", entity)))?;

    Ok(Json(PunishmentRecord::new(entity, expires_at)))
}
