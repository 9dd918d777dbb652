use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};
use tracing::{info, warn};

use crate::api::{auth::ensure_trigger_authorized, handlers::error_response, state::AppState};
use crate::engine::{SessionReport, SessionRequest};
use crate::error::{ArenaError, Result};

/// Empty body means "default session"
fn parse_request(body: &[u8]) -> Result<SessionRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(SessionRequest::new());
    }
    let request: SessionRequest = serde_json::from_slice(body)
        .map_err(|e| ArenaError::Validation(format!("malformed session request: {e}")))?;
    if request.budget_secs == Some(0) {
        return Err(ArenaError::Validation("budget_secs must be positive".to_string()));
    }
    Ok(request)
}

/// POST /api/session
///
/// Auth and body are both checked before any work starts. Agent failures
/// still produce a 200 with the full report.
pub async fn trigger_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<SessionReport>, (StatusCode, String)> {
    if let Err(e) = ensure_trigger_authorized(&headers, state.trigger_fingerprint.as_deref()) {
        warn!(error = %e, "session trigger rejected");
        return Err(error_response(e));
    }
    let request = parse_request(&body).map_err(error_response)?;

    info!(
        agent = ?request.agent,
        dry_run = request.dry_run,
        force = request.force,
        rerun = request.rerun,
        "session triggered over http"
    );
    let report = state.runner.run(request).await.map_err(error_response)?;
    Ok(Json(report))
}
