use axum::{
    routing::{delete, get},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Create the HTTP router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/api/events", get(handlers::list_events))
        .route("/api/events", delete(handlers::delete_events))
        .route("/api/events/active", get(handlers::active_events))
        .route("/api/status", get(handlers::status))
        .route("/api/audio/:filename", get(handlers::audio))
        .route("/ws/console", get(handlers::ws_console))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
