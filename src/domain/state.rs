use serde::{Deserialize, Serialize};
use std::fmt;

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Checking competition status and trading window
    Gated,
    /// Iterating agents
    Running,
    /// All agents processed (or budget exhausted) and ranks persisted
    Completed,
    /// Gate closed; no agent touched
    Skipped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Gated => "gated",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Skipped => "skipped",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        matches!((self, target), (Gated, Running) | (Gated, Skipped) | (Running, Completed))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Skipped)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
