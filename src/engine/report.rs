//! Session report returned by every session run

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::calendar::GateOutcome;
use super::executor::ExecutionResult;
use crate::domain::{ProposedAction, SessionState, Sentiment};

/// How one agent's turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRunStatus {
    /// At least one action executed or simulated
    Executed,
    NoAction,
    Failed,
    /// Already has a decision in this slot
    Skipped,
    /// Session budget ran out first
    NotStarted,
}

impl AgentRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRunStatus::Executed => "executed",
            AgentRunStatus::NoAction => "no_action",
            AgentRunStatus::Failed => "failed",
            AgentRunStatus::Skipped => "skipped",
            AgentRunStatus::NotStarted => "not_started",
        }
    }
}

/// One proposed action and what became of it
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action: ProposedAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
    /// Set when the action could not be evaluated (no price, ledger failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(
            self.result,
            Some(ExecutionResult::Executed { .. }) | Some(ExecutionResult::Simulated { .. })
        )
    }

    pub fn is_rejected(&self) -> bool {
        self.result.as_ref().map(|r| r.is_rejected()).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResult {
    pub agent_id: String,
    pub status: AgentRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    pub summary: String,
    pub actions: Vec<ActionOutcome>,
    pub tokens: u64,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// A validated trade failed to persist
    pub ledger_drift: bool,
}

impl AgentResult {
    pub fn new(agent_id: &str, status: AgentRunStatus) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status,
            skip_reason: None,
            sentiment: None,
            summary: String::new(),
            actions: Vec::new(),
            tokens: 0,
            latency_ms: 0,
            error: None,
            ledger_drift: false,
        }
    }

    pub fn skipped(agent_id: &str, reason: &str) -> Self {
        Self {
            skip_reason: Some(reason.to_string()),
            ..Self::new(agent_id, AgentRunStatus::Skipped)
        }
    }

    pub fn failed(agent_id: &str, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(agent_id, AgentRunStatus::Failed)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionTotals {
    pub agents_processed: usize,
    pub agents_failed: usize,
    pub trades_executed: usize,
    pub trades_rejected: usize,
    pub tokens: u64,
    pub provider_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: SessionState,
    pub gate: Option<GateOutcome>,
    pub dry_run: bool,
    pub agents: Vec<AgentResult>,
    pub totals: SessionTotals,
    pub errors: Vec<String>,
}

impl SessionReport {
    pub fn new(session_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            session_id,
            started_at,
            finished_at: None,
            state: SessionState::Gated,
            gate: None,
            dry_run,
            agents: Vec::new(),
            totals: SessionTotals::default(),
            errors: Vec::new(),
        }
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&mut self, next: SessionState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }

    pub fn result_for(&self, agent_id: &str) -> Option<&AgentResult> {
        self.agents.iter().find(|r| r.agent_id == agent_id)
    }

    /// Close the report: compute totals and stamp the finish time
    pub fn finish(&mut self, finished_at: DateTime<Utc>) {
        let mut totals = SessionTotals::default();
        for r in &self.agents {
            match r.status {
                AgentRunStatus::Executed | AgentRunStatus::NoAction => totals.agents_processed += 1,
                AgentRunStatus::Failed => {
                    totals.agents_processed += 1;
                    totals.agents_failed += 1;
                }
                AgentRunStatus::Skipped | AgentRunStatus::NotStarted => {}
            }
            totals.trades_executed += r.actions.iter().filter(|a| a.is_executed()).count();
            totals.trades_rejected += r.actions.iter().filter(|a| a.is_rejected()).count();
            totals.tokens += r.tokens;
            totals.provider_latency_ms += r.latency_ms;
        }
        self.totals = totals;
        self.finished_at = Some(finished_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RejectReason;

    #[test]
    fn test_finish_counts_outcomes() {
        let mut report = SessionReport::new(Uuid::new_v4(), Utc::now(), false);
        let mut ok = AgentResult::new("a", AgentRunStatus::NoAction);
        ok.tokens = 120;
        ok.latency_ms = 900;
        ok.actions.push(ActionOutcome {
            action: ProposedAction::sell("AAPL", rust_decimal::Decimal::ONE),
            result: Some(ExecutionResult::Rejected {
                reason: RejectReason::HoldNotExecutable,
            }),
            error: None,
        });
        report.agents.push(ok);
        report.agents.push(AgentResult::failed("b", "timed out"));
        report.agents.push(AgentResult::skipped("c", "already_processed"));

        report.finish(Utc::now());
        assert_eq!(report.totals.agents_processed, 2);
        assert_eq!(report.totals.agents_failed, 1);
        assert_eq!(report.totals.trades_rejected, 1);
        assert_eq!(report.totals.tokens, 120);
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_state_machine_guards_transitions() {
        let mut report = SessionReport::new(Uuid::new_v4(), Utc::now(), false);
        assert!(!report.transition(SessionState::Completed));
        assert!(report.transition(SessionState::Running));
        assert!(!report.transition(SessionState::Skipped));
        assert!(report.transition(SessionState::Completed));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_value(AgentResult::new("x", AgentRunStatus::NotStarted)).unwrap();
        assert_eq!(json["status"], "not_started");
        assert!(json.get("error").is_none());
    }
}
