//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, enable_cors: bool) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Punishments
        .route(
            "/punishments",
            get(handlers::list_punishments).post(handlers::create_punishment),
        )
        .route("/punishments/lift", post(handlers::lift_punishment))
        .route(
            "/punishments/:community_id/:user_id",
            get(handlers::get_punishment),
        )
        // Escalation
        .route("/violations", post(handlers::report_violation))
        // Membership
        .route("/members/rejoined", post(handlers::member_rejoined))
        .route(
            "/communities/:community_id/roles/:name",
            get(handlers::find_role),
        )
        // Events
        .route("/events/stream", get(handlers::stream_events));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    let router = if enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
