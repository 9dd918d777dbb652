use axum::{extract::State, http::StatusCode, Json};

use crate::api::{handlers::error_response, state::AppState, types::LeaderboardResponse};
use crate::metrics::build_leaderboard;

/// GET /api/leaderboard
pub async fn get_leaderboard(
    State(state): State<AppState>,
) -> std::result::Result<Json<LeaderboardResponse>, (StatusCode, String)> {
    let rf = state.runner.config().metrics.risk_free_rate;
    let entries = build_leaderboard(state.runner.ledger().as_ref(), rf)
        .await
        .map_err(error_response)?;

    Ok(Json(LeaderboardResponse {
        total: entries.len(),
        entries,
    }))
}
