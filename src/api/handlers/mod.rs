pub mod leaderboard;
pub mod session;
pub mod system;

pub use leaderboard::*;
pub use session::*;
pub use system::*;

use axum::http::StatusCode;

use crate::error::ArenaError;

/// Map an engine error to the response the trigger caller sees
pub(crate) fn error_response(err: ArenaError) -> (StatusCode, String) {
    let status = match &err {
        ArenaError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        ArenaError::Validation(_) => StatusCode::BAD_REQUEST,
        ArenaError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
