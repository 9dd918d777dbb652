use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_handler))
        // Session trigger
        .route("/api/session", post(handlers::trigger_session))
        // Ranked view
        .route("/api/leaderboard", get(handlers::get_leaderboard))
        .with_state(state)
        .layer(cors)
}
