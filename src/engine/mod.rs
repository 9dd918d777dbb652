//! Competition engine: gating, trade execution, screening and sessions

pub mod calendar;
pub mod executor;
pub mod orchestrator;
pub mod report;
pub mod rules;
pub mod screening;
pub mod valuation;

pub use calendar::{GateOutcome, GateReason, TradingCalendar};
pub use executor::{plan_trade, ExecutionResult, TradeExecutor, TradePlan};
pub use orchestrator::{SessionRequest, SessionRunner};
pub use report::{ActionOutcome, AgentResult, AgentRunStatus, SessionReport, SessionTotals};
pub use rules::ModeRules;
pub use screening::{
    build_brief, rank_candidates, score_candidate, system_prompt, BriefInput, CandidateInput,
    ScoredCandidate,
};
pub use valuation::{refresh_rankings, take_snapshots};
