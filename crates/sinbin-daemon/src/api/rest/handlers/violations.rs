//! Violation handler

use crate::api::rest::state::AppState;
use crate::moderation::ViolationOutcome;
use axum::{extract::State, Json};
use serde::Deserialize;
use sinbin_types::EntityId;

/// Violation report
#[derive(Debug, Deserialize)]
pub struct ViolationRequest {
    pub entity: EntityId,
}

/// Record a rule violation and escalate repeats
pub async fn report_violation(
    State(state): State<AppState>,
    Json(req): Json<ViolationRequest>,
) -> Json<ViolationOutcome> {
    Json(state.escalation.handle_violation(req.entity).await)
}
