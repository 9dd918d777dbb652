//! Session orchestrator
//!
//! One session is a gated pass over every active agent:
//! - gate on competition dates and the trading window
//! - per agent: quotes, brief, provider decision, validate + execute
//! - revalue and rank the whole field
//!
//! A failing agent is recorded and skipped; it never aborts the session.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::calendar::{GateOutcome, TradingCalendar};
use super::executor::TradeExecutor;
use super::report::{ActionOutcome, AgentResult, AgentRunStatus, SessionReport};
use super::rules::ModeRules;
use super::screening::{
    build_brief, load_fundamentals, rank_candidates, system_prompt, BriefInput, CandidateInput,
};
use super::valuation::refresh_rankings;
use crate::agent::ProviderRegistry;
use crate::config::AppConfig;
use crate::domain::{
    ActionSide, Agent, CompetitionConfig, CompetitionMode, DecisionOutcome, DecisionRecord,
    Fundamentals, Quote, SessionState,
};
use crate::error::Result;
use crate::ledger::{AgentLocks, LedgerStore};
use crate::market::QuoteResolver;
use crate::metrics::{build_leaderboard, LeaderboardEntry};

/// Parameters of one session trigger
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionRequest {
    /// Run a single agent instead of the whole roster
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    /// Ignore the trading-window check
    #[serde(default)]
    pub force: bool,
    /// Process agents that already decided in this slot
    #[serde(default)]
    pub rerun: bool,
    /// Wall-clock budget; the configured one when absent
    #[serde(default)]
    pub budget_secs: Option<u64>,
}

impl SessionRequest {
    pub fn new() -> Self {
        Self {
            agent: None,
            dry_run: false,
            force: false,
            rerun: false,
            budget_secs: None,
        }
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn rerun(mut self) -> Self {
        self.rerun = true;
        self
    }

    pub fn for_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent = Some(agent_id.into());
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget_secs = Some(budget.as_secs());
        self
    }
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-session values shared by every agent's turn
struct SessionContext {
    session_id: Uuid,
    slot: String,
    competition: CompetitionConfig,
    dry_run: bool,
    leaderboard: Option<Vec<LeaderboardEntry>>,
    now: DateTime<Utc>,
    /// Provider calls must finish by then; `None` when the budget is unbounded
    deadline: Option<Instant>,
}

/// Drives sessions over the ledger, quote resolver and provider registry
pub struct SessionRunner {
    config: Arc<AppConfig>,
    ledger: Arc<dyn LedgerStore>,
    quotes: Arc<dyn QuoteResolver>,
    providers: ProviderRegistry,
    executor: TradeExecutor,
    calendar: TradingCalendar,
    rules: ModeRules,
    fundamentals: HashMap<String, Fundamentals>,
    /// One session at a time per runner
    running: Mutex<()>,
}

impl SessionRunner {
    pub fn new(
        config: Arc<AppConfig>,
        ledger: Arc<dyn LedgerStore>,
        quotes: Arc<dyn QuoteResolver>,
        providers: ProviderRegistry,
    ) -> Result<Self> {
        let calendar = TradingCalendar::from_config(&config.trading_window)?;
        let rules = ModeRules::from(&config.modes);
        let executor = TradeExecutor::new(Arc::clone(&ledger), AgentLocks::new(), rules.clone());

        let mut fundamentals = HashMap::new();
        if let Some(path) = &config.session.fundamentals_file {
            match load_fundamentals(path) {
                Ok(list) => {
                    info!(path = %path, count = list.len(), "loaded candidate fundamentals");
                    fundamentals = list.into_iter().map(|f| (f.symbol.clone(), f)).collect();
                }
                Err(e) => warn!(path = %path, error = %e, "fundamentals unavailable, screening on quotes only"),
            }
        }

        Ok(Self {
            config,
            ledger,
            quotes,
            providers,
            executor,
            calendar,
            rules,
            fundamentals,
            running: Mutex::new(()),
        })
    }

    /// Replace the candidate fundamentals
    pub fn with_fundamentals(mut self, list: Vec<Fundamentals>) -> Self {
        self.fundamentals = list
            .into_iter()
            .map(|f| (f.symbol.to_ascii_uppercase(), f))
            .collect();
        self
    }

    pub fn ledger(&self) -> &Arc<dyn LedgerStore> {
        &self.ledger
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub async fn run(&self, request: SessionRequest) -> Result<SessionReport> {
        self.run_at(request, Utc::now()).await
    }

    /// Run one session as if the clock read `now`.
    ///
    /// Only ledger reads that fail before any agent is touched are returned as
    /// errors; everything after that lands in the report.
    #[instrument(skip(self, request), fields(dry_run = request.dry_run, force = request.force))]
    pub async fn run_at(&self, request: SessionRequest, now: DateTime<Utc>) -> Result<SessionReport> {
        let _running = self.running.lock().await;
        let clock = Instant::now();
        let budget = Duration::from_secs(request.budget_secs.unwrap_or(self.config.session.budget_secs));
        let mut report = SessionReport::new(Uuid::new_v4(), now, request.dry_run);

        let competition = match self.ledger.get_competition().await? {
            Some(c) => c,
            None => self.config.competition.to_competition(),
        };

        let gate = self.calendar.gate(&competition, now, request.force);
        report.gate = Some(gate.clone());
        let slot = match gate {
            GateOutcome::Open { slot, .. } => slot,
            GateOutcome::Closed { reason } => {
                info!(session = %report.session_id, reason = %reason, "session gated");
                report.transition(SessionState::Skipped);
                report.finish(Utc::now());
                return Ok(report);
            }
        };
        report.transition(SessionState::Running);

        let mut agents: Vec<Agent> = self
            .ledger
            .list_agents()
            .await?
            .into_iter()
            .filter(|a| a.is_active())
            .collect();
        if let Some(only) = &request.agent {
            agents.retain(|a| &a.id == only);
            if agents.is_empty() {
                report
                    .errors
                    .push(format!("agent '{only}' not found or not active"));
            }
        }

        info!(
            session = %report.session_id,
            slot = %slot,
            agents = agents.len(),
            budget_secs = budget.as_secs(),
            "session started"
        );

        let leaderboard = if agents.iter().any(|a| a.mode == CompetitionMode::SeeCompetitors) {
            match build_leaderboard(self.ledger.as_ref(), self.config.metrics.risk_free_rate).await {
                Ok(board) => Some(board),
                Err(e) => {
                    warn!(error = %e, "leaderboard unavailable for competitor briefs");
                    None
                }
            }
        } else {
            None
        };

        let ctx = SessionContext {
            session_id: report.session_id,
            slot,
            competition,
            dry_run: request.dry_run,
            leaderboard,
            now,
            deadline: clock.checked_add(budget),
        };

        for (idx, agent) in agents.iter().enumerate() {
            if clock.elapsed() >= budget {
                let remaining = agents.len() - idx;
                warn!(
                    session = %ctx.session_id,
                    remaining,
                    elapsed_ms = clock.elapsed().as_millis() as u64,
                    "session budget exhausted"
                );
                report.errors.push(format!(
                    "session budget of {}s exhausted; {} agent(s) not started",
                    budget.as_secs(),
                    remaining
                ));
                for rest in &agents[idx..] {
                    report
                        .agents
                        .push(AgentResult::new(&rest.id, AgentRunStatus::NotStarted));
                }
                break;
            }

            if !request.rerun {
                match self.ledger.has_decision_in_slot(&agent.id, &ctx.slot).await {
                    Ok(true) => {
                        debug!(agent = %agent.id, slot = %ctx.slot, "already processed in slot");
                        report
                            .agents
                            .push(AgentResult::skipped(&agent.id, "already_processed"));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(agent = %agent.id, error = %e, "slot check failed");
                        report.errors.push(format!("{}: slot check failed: {e}", agent.id));
                        report.agents.push(AgentResult::failed(&agent.id, e.to_string()));
                        continue;
                    }
                }
            }

            let result = self.process_agent(&ctx, agent, &mut report.errors).await;
            report.agents.push(result);
        }

        if !ctx.dry_run {
            if let Err(e) = refresh_rankings(self.ledger.as_ref()).await {
                error!(session = %ctx.session_id, error = %e, "failed to persist rankings");
                report.errors.push(format!("ranking update failed: {e}"));
            }
        }

        report.transition(SessionState::Completed);
        report.finish(Utc::now());
        info!(
            session = %report.session_id,
            executed = report.totals.trades_executed,
            rejected = report.totals.trades_rejected,
            failed = report.totals.agents_failed,
            tokens = report.totals.tokens,
            elapsed_ms = clock.elapsed().as_millis() as u64,
            "session completed"
        );
        Ok(report)
    }

    /// Candidate universe: configured symbols plus every symbol with fundamentals
    fn universe(&self) -> BTreeSet<String> {
        self.config
            .session
            .universe
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .chain(self.fundamentals.keys().cloned())
            .collect()
    }

    #[instrument(skip_all, fields(agent = %agent.id))]
    async fn process_agent(
        &self,
        ctx: &SessionContext,
        agent: &Agent,
        session_errors: &mut Vec<String>,
    ) -> AgentResult {
        let mut result = AgentResult::new(&agent.id, AgentRunStatus::NoAction);

        let Some(adapter) = self.providers.get(&agent.id) else {
            warn!("no decision provider configured");
            let failed = AgentResult::failed(&agent.id, "no decision provider configured");
            self.record(ctx, &failed, None, session_errors).await;
            return failed;
        };

        let mut positions = match self.ledger.get_positions(&agent.id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "could not load positions");
                session_errors.push(format!("{}: {e}", agent.id));
                let failed = AgentResult::failed(&agent.id, e.to_string());
                self.record(ctx, &failed, None, session_errors).await;
                return failed;
            }
        };

        let universe = self.universe();
        let symbols: Vec<String> = positions
            .iter()
            .map(|p| p.symbol.clone())
            .chain(universe.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let quotes: HashMap<String, Quote> = if symbols.is_empty() {
            HashMap::new()
        } else {
            self.quotes.get_quotes_batch(&symbols).await
        };
        debug!(requested = symbols.len(), resolved = quotes.len(), "quotes fetched");

        let prices: HashMap<String, _> = quotes.iter().map(|(s, q)| (s.clone(), q.price)).collect();
        for p in &mut positions {
            if let Some(price) = prices.get(&p.symbol) {
                p.current_price = *price;
            }
        }
        if !ctx.dry_run && !prices.is_empty() {
            if let Err(e) = self.ledger.mark_positions(&agent.id, &prices).await {
                warn!(error = %e, "failed to mark positions to market");
            }
        }

        let recent = match self
            .ledger
            .recent_trades(&agent.id, self.config.session.recent_trades)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "recent trades unavailable");
                Vec::new()
            }
        };

        let candidates = rank_candidates(
            universe
                .iter()
                .filter_map(|s| {
                    let quote = quotes.get(s);
                    let fundamentals = self.fundamentals.get(s);
                    quote.map(|q| CandidateInput::from_parts(s, fundamentals, Some(q)))
                })
                .collect(),
            self.config.session.max_candidates,
        );

        let leaderboard = match agent.mode {
            CompetitionMode::SeeCompetitors => ctx.leaderboard.as_deref(),
            _ => None,
        };
        let brief = build_brief(
            &BriefInput {
                agent,
                positions: &positions,
                recent_trades: &recent,
                candidates: &candidates,
                leaderboard,
                local_date: self.calendar.local_date(ctx.now),
            },
            self.config.session.brief_max_chars,
        );
        let system = system_prompt(agent, &ctx.competition, &self.rules);

        let answer = match ctx.deadline {
            Some(deadline) => adapter.get_decision_before(&system, &brief, deadline).await,
            None => adapter.get_decision(&system, &brief).await,
        };
        let decision = match answer {
            Ok(d) => d,
            Err(failure) => {
                warn!(
                    kind = failure.error.kind(),
                    attempts = failure.usage.attempts,
                    error = %failure.error,
                    "agent failed to decide"
                );
                let mut failed = AgentResult::failed(&agent.id, failure.to_string());
                failed.tokens = failure.usage.tokens;
                failed.latency_ms = failure.usage.latency_ms;
                self.record(ctx, &failed, failure.raw.as_deref(), session_errors)
                    .await;
                return failed;
            }
        };

        result.sentiment = Some(decision.decision.sentiment);
        result.summary = decision.decision.summary.clone();
        result.tokens = decision.usage.tokens;
        result.latency_ms = decision.usage.latency_ms;

        for action in &decision.decision.actions {
            if action.side == ActionSide::Hold {
                continue;
            }

            let price = match quotes.get(&action.symbol) {
                Some(q) => Some(q.price),
                None => match self.quotes.get_quote(&action.symbol).await {
                    Ok(q) => q.map(|q| q.price),
                    Err(e) => {
                        warn!(symbol = %action.symbol, error = %e, "quote lookup failed");
                        None
                    }
                },
            };
            let Some(price) = price else {
                info!(symbol = %action.symbol, "no price for proposed trade");
                result.actions.push(ActionOutcome {
                    action: action.clone(),
                    result: None,
                    error: Some(format!("quote unavailable for {}", action.symbol)),
                });
                continue;
            };

            match self
                .executor
                .execute(
                    &ctx.competition,
                    &agent.id,
                    action,
                    price,
                    Some(ctx.session_id),
                    ctx.dry_run,
                )
                .await
            {
                Ok(outcome) => result.actions.push(ActionOutcome {
                    action: action.clone(),
                    result: Some(outcome),
                    error: None,
                }),
                Err(e) => {
                    // The executor already raised the alert; later actions would
                    // run against state we no longer trust.
                    result.ledger_drift = true;
                    result.error = Some(e.to_string());
                    result.actions.push(ActionOutcome {
                        action: action.clone(),
                        result: None,
                        error: Some(e.to_string()),
                    });
                    session_errors.push(format!("{}: ledger drift on {}: {e}", agent.id, action.symbol));
                    break;
                }
            }
        }

        result.status = if result.actions.iter().any(|a| a.is_executed()) {
            AgentRunStatus::Executed
        } else if result.ledger_drift {
            AgentRunStatus::Failed
        } else {
            AgentRunStatus::NoAction
        };

        info!(
            status = result.status.as_str(),
            actions = result.actions.len(),
            tokens = result.tokens,
            latency_ms = result.latency_ms,
            "agent processed"
        );

        self.record(ctx, &result, Some(&decision.raw), session_errors)
            .await;
        result
    }

    /// Append the agent's decision record; dry runs write nothing.
    ///
    /// The slot check relies on this record, so a failed write is reported as
    /// drift: a retried trigger would process the agent again.
    async fn record(
        &self,
        ctx: &SessionContext,
        result: &AgentResult,
        raw: Option<&str>,
        session_errors: &mut Vec<String>,
    ) {
        if ctx.dry_run {
            return;
        }

        let outcome = match result.status {
            AgentRunStatus::Executed => DecisionOutcome::Executed,
            AgentRunStatus::NoAction => DecisionOutcome::NoAction,
            _ => DecisionOutcome::Failed,
        };
        let record = DecisionRecord {
            id: Uuid::new_v4(),
            session_id: ctx.session_id,
            slot: ctx.slot.clone(),
            agent_id: result.agent_id.clone(),
            sentiment: result.sentiment,
            actions: serde_json::to_value(&result.actions).unwrap_or_default(),
            summary: result.summary.clone(),
            raw_response: raw.map(str::to_string),
            tokens_used: result.tokens,
            latency_ms: result.latency_ms,
            outcome,
            error: result.error.clone(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.ledger.record_decision(&record).await {
            error!(
                alert = "ledger_drift",
                agent = %result.agent_id,
                slot = %ctx.slot,
                outcome = outcome.as_str(),
                error = %e,
                "failed to record decision"
            );
            session_errors.push(format!(
                "{}: ledger drift: decision record for slot {} not written: {e}",
                result.agent_id, ctx.slot
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DecisionAdapter, RetryPolicy, ScriptedProvider};
    use crate::domain::ProviderKind;
    use crate::ledger::MemoryLedger;
    use crate::market::StaticQuoteResolver;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn config() -> AppConfig {
        let mut cfg = AppConfig::default_config();
        cfg.trading_window.utc_offset_minutes = 0;
        cfg.trading_window.windows = vec!["09:00-17:00".into()];
        cfg.session.universe = vec!["AAPL".into()];
        cfg
    }

    // Friday 2026-10-16 10:00 UTC
    fn open_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 10, 0, 0).unwrap()
    }

    async fn runner(script: &str) -> (SessionRunner, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new());
        let agent = Agent::new("alpha", "Alpha", ProviderKind::Scripted, "script", dec!(10000), CompetitionMode::Baseline);
        ledger.insert_agent(&agent).await.unwrap();

        let mut providers = ProviderRegistry::new();
        providers.insert(
            "alpha",
            DecisionAdapter::new(
                Arc::new(ScriptedProvider::fixed(script)),
                RetryPolicy::none(),
                Duration::from_secs(5),
            ),
        );
        let quotes = Arc::new(StaticQuoteResolver::with_prices([("AAPL", dec!(100))]));
        let runner = SessionRunner::new(Arc::new(config()), ledger.clone(), quotes, providers).unwrap();
        (runner, ledger)
    }

    const BUY: &str = r#"{"sentiment":"bullish","summary":"buy","actions":[{"action":"buy","symbol":"AAPL","quantity":10}]}"#;

    #[tokio::test]
    async fn test_closed_gate_touches_nothing() {
        let (runner, ledger) = runner(BUY).await;
        let saturday = Utc.with_ymd_and_hms(2026, 10, 17, 10, 0, 0).unwrap();
        let report = runner.run_at(SessionRequest::new(), saturday).await.unwrap();
        assert_eq!(report.state, SessionState::Skipped);
        assert!(report.agents.is_empty());
        assert!(ledger.decisions_for("alpha").await.is_empty());
    }

    #[tokio::test]
    async fn test_executes_and_records_slot() {
        let (runner, ledger) = runner(BUY).await;
        let report = runner.run_at(SessionRequest::new(), open_time()).await.unwrap();
        assert_eq!(report.state, SessionState::Completed);
        assert_eq!(report.agents[0].status, AgentRunStatus::Executed);
        assert_eq!(report.totals.trades_executed, 1);

        let decisions = ledger.decisions_for("alpha").await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].slot, "2026-10-16#0");

        let again = runner.run_at(SessionRequest::new(), open_time()).await.unwrap();
        assert_eq!(again.agents[0].status, AgentRunStatus::Skipped);
        assert_eq!(ledger.trade_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_session_error() {
        let (runner, _) = runner(BUY).await;
        let report = runner
            .run_at(SessionRequest::new().for_agent("ghost"), open_time())
            .await
            .unwrap();
        assert!(report.agents.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_unpriced_action_is_reported() {
        let (runner, ledger) = runner(
            r#"{"sentiment":"neutral","actions":[{"action":"buy","symbol":"NOPE","quantity":1}]}"#,
        )
        .await;
        let report = runner.run_at(SessionRequest::new(), open_time()).await.unwrap();
        let result = report.result_for("alpha").unwrap();
        assert_eq!(result.status, AgentRunStatus::NoAction);
        assert!(result.actions[0].error.as_deref().unwrap().contains("NOPE"));
        assert_eq!(ledger.trade_count().await, 0);
    }

    #[tokio::test]
    async fn test_lost_decision_record_is_reported_as_drift() {
        let (runner, ledger) = runner(BUY).await;
        ledger.inject_decision_write_failures(1);

        let report = runner.run_at(SessionRequest::new(), open_time()).await.unwrap();
        assert_eq!(report.agents[0].status, AgentRunStatus::Executed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("ledger drift") && e.contains("2026-10-16#0")));
        assert!(ledger.decisions_for("alpha").await.is_empty());
    }

    #[tokio::test]
    async fn test_position_read_failure_still_records_decision() {
        let (runner, ledger) = runner(BUY).await;
        ledger.inject_position_read_failures(1);

        let report = runner.run_at(SessionRequest::new(), open_time()).await.unwrap();
        assert_eq!(report.agents[0].status, AgentRunStatus::Failed);
        assert_eq!(report.errors.len(), 1);

        let records = ledger.decisions_for("alpha").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, DecisionOutcome::Failed);
        assert_eq!(ledger.trade_count().await, 0);
    }
}
