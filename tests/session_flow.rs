//! End-to-end sessions against the in-memory ledger, fixed quotes and
//! scripted providers.

use arena::agent::{DecisionAdapter, ProviderRegistry, RetryPolicy, ScriptedProvider};
use arena::config::AppConfig;
use arena::domain::{Agent, CompetitionMode, DecisionOutcome, ProviderKind, SessionState};
use arena::engine::{AgentRunStatus, ExecutionResult, SessionRequest, SessionRunner};
use arena::error::ProviderError;
use arena::ledger::{LedgerStore, MemoryLedger};
use arena::market::StaticQuoteResolver;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const BUY_AAPL: &str = r#"```json
{"sentiment":"bullish","top_picks":["AAPL"],"summary":"adding apple",
 "actions":[{"action":"buy","symbol":"AAPL","quantity":5,"reason":"momentum"}]}
```"#;

const HOLD: &str = r#"{"sentiment":"neutral","summary":"waiting","actions":[{"action":"hold","symbol":"MSFT"}]}"#;

fn config() -> AppConfig {
    let mut cfg = AppConfig::default_config();
    cfg.trading_window.utc_offset_minutes = -300;
    cfg.trading_window.windows = vec!["09:30-11:30".into(), "13:00-16:00".into()];
    cfg.session.universe = vec!["AAPL".into(), "MSFT".into()];
    cfg
}

/// Friday 2026-10-16, 10:00 in UTC-5
fn in_window() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 15, 0, 0).unwrap()
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    runner: SessionRunner,
}

fn adapter(provider: ScriptedProvider, timeout: Duration) -> DecisionAdapter {
    DecisionAdapter::new(Arc::new(provider), RetryPolicy::none(), timeout)
}

async fn harness(agents: Vec<(&str, ScriptedProvider)>) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    let mut providers = ProviderRegistry::new();
    for (id, provider) in agents {
        let agent = Agent::new(id, id, ProviderKind::Scripted, "script", dec!(10000), CompetitionMode::Baseline);
        ledger.insert_agent(&agent).await.unwrap();
        providers.insert(id, adapter(provider, Duration::from_millis(200)));
    }
    let quotes = Arc::new(StaticQuoteResolver::with_prices([
        ("AAPL", dec!(100)),
        ("MSFT", dec!(400)),
    ]));
    let runner = SessionRunner::new(Arc::new(config()), ledger.clone(), quotes, providers).unwrap();
    Harness { ledger, runner }
}

#[tokio::test]
async fn provider_timeout_fails_one_agent_and_the_rest_complete() {
    let h = harness(vec![
        ("alpha", ScriptedProvider::fixed(BUY_AAPL)),
        ("beta", ScriptedProvider::fixed(BUY_AAPL).with_delay(Duration::from_secs(2))),
        ("gamma", ScriptedProvider::fixed(HOLD)),
    ])
    .await;

    let report = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();

    assert_eq!(report.state, SessionState::Completed);
    assert_eq!(report.result_for("alpha").unwrap().status, AgentRunStatus::Executed);
    assert_eq!(report.result_for("gamma").unwrap().status, AgentRunStatus::NoAction);

    let beta = report.result_for("beta").unwrap();
    assert_eq!(beta.status, AgentRunStatus::Failed);
    assert!(beta.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(report.totals.agents_failed, 1);
    assert_eq!(report.totals.trades_executed, 1);

    // Every agent got a decision record, the failed one included
    let beta_records = h.ledger.decisions_for("beta").await;
    assert_eq!(beta_records.len(), 1);
    assert_eq!(beta_records[0].outcome, DecisionOutcome::Failed);

    // alpha paid 500 + 0.75 fee, so it ranks last
    let alpha = h.ledger.get_agent("alpha").await.unwrap().unwrap();
    assert_eq!(alpha.cash, dec!(9499.25));
    assert_eq!(alpha.portfolio_value, dec!(9999.25));
    assert_eq!(alpha.rank, Some(3));
    assert_eq!(h.ledger.get_agent("beta").await.unwrap().unwrap().rank, Some(1));
    assert_eq!(h.ledger.get_agent("gamma").await.unwrap().unwrap().rank, Some(2));
}

#[tokio::test]
async fn retried_trigger_in_same_slot_skips_processed_agents() {
    let h = harness(vec![("alpha", ScriptedProvider::fixed(BUY_AAPL))]).await;

    h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();
    let second = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();
    let alpha = second.result_for("alpha").unwrap();
    assert_eq!(alpha.status, AgentRunStatus::Skipped);
    assert_eq!(alpha.skip_reason.as_deref(), Some("already_processed"));
    assert_eq!(h.ledger.trade_count().await, 1);

    let rerun = h
        .runner
        .run_at(SessionRequest::new().rerun(), in_window())
        .await
        .unwrap();
    assert_eq!(rerun.result_for("alpha").unwrap().status, AgentRunStatus::Executed);
    assert_eq!(h.ledger.trade_count().await, 2);

    // Next window is a new slot
    let afternoon = Utc.with_ymd_and_hms(2026, 10, 16, 18, 30, 0).unwrap();
    let later = h.runner.run_at(SessionRequest::new(), afternoon).await.unwrap();
    assert_eq!(later.result_for("alpha").unwrap().status, AgentRunStatus::Executed);
}

#[tokio::test]
async fn exhausted_budget_leaves_agents_not_started() {
    let h = harness(vec![
        ("alpha", ScriptedProvider::fixed(BUY_AAPL)),
        ("beta", ScriptedProvider::fixed(HOLD)),
    ])
    .await;

    let report = h
        .runner
        .run_at(SessionRequest::new().with_budget(Duration::ZERO), in_window())
        .await
        .unwrap();

    assert_eq!(report.agents.len(), 2);
    assert!(report
        .agents
        .iter()
        .all(|a| a.status == AgentRunStatus::NotStarted));
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("budget"));
    assert_eq!(report.state, SessionState::Completed);
}

#[tokio::test]
async fn dry_run_simulates_without_writing() {
    let h = harness(vec![("alpha", ScriptedProvider::fixed(BUY_AAPL))]).await;

    let report = h
        .runner
        .run_at(SessionRequest::new().dry_run(), in_window())
        .await
        .unwrap();

    let alpha = report.result_for("alpha").unwrap();
    assert_eq!(alpha.status, AgentRunStatus::Executed);
    assert!(matches!(
        alpha.actions[0].result,
        Some(ExecutionResult::Simulated { .. })
    ));
    assert_eq!(h.ledger.trade_count().await, 0);
    assert!(h.ledger.decisions_for("alpha").await.is_empty());
    assert_eq!(h.ledger.get_agent("alpha").await.unwrap().unwrap().cash, dec!(10000));
}

#[tokio::test]
async fn repeated_version_conflict_is_reported_as_ledger_drift() {
    let h = harness(vec![("alpha", ScriptedProvider::fixed(BUY_AAPL))]).await;
    h.ledger.inject_conflicts(2);

    let report = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();

    let alpha = report.result_for("alpha").unwrap();
    assert!(alpha.ledger_drift);
    assert_eq!(alpha.status, AgentRunStatus::Failed);
    assert!(report.errors.iter().any(|e| e.contains("ledger drift")));
    assert_eq!(h.ledger.trade_count().await, 0);
}

#[tokio::test]
async fn single_conflict_is_retried_transparently() {
    let h = harness(vec![("alpha", ScriptedProvider::fixed(BUY_AAPL))]).await;
    h.ledger.inject_conflicts(1);

    let report = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();
    assert_eq!(report.result_for("alpha").unwrap().status, AgentRunStatus::Executed);
    assert_eq!(h.ledger.trade_count().await, 1);
}

#[tokio::test]
async fn invalid_answer_and_provider_error_are_agent_failures() {
    let h = harness(vec![
        ("alpha", ScriptedProvider::fixed("I think you should buy Apple.")),
        (
            "beta",
            ScriptedProvider::failing(ProviderError::Status {
                code: 401,
                body: "bad key".into(),
            }),
        ),
        ("gamma", ScriptedProvider::fixed(HOLD)),
    ])
    .await;

    let report = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();
    assert_eq!(report.result_for("alpha").unwrap().status, AgentRunStatus::Failed);
    assert_eq!(report.result_for("beta").unwrap().status, AgentRunStatus::Failed);
    assert_eq!(report.result_for("gamma").unwrap().status, AgentRunStatus::NoAction);

    // The unparseable answer is kept for auditing
    let records = h.ledger.decisions_for("alpha").await;
    assert_eq!(records[0].raw_response.as_deref(), Some("I think you should buy Apple."));
}

#[tokio::test]
async fn rejected_trade_is_no_action() {
    // 40 * 100 = 4000 > 30% of 10000
    let h = harness(vec![(
        "alpha",
        ScriptedProvider::fixed(
            r#"{"sentiment":"bullish","actions":[{"action":"buy","symbol":"AAPL","quantity":40}]}"#,
        ),
    )])
    .await;

    let report = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();
    let alpha = report.result_for("alpha").unwrap();
    assert_eq!(alpha.status, AgentRunStatus::NoAction);
    assert!(alpha.actions[0].is_rejected());
    assert_eq!(report.totals.trades_rejected, 1);
    assert_eq!(h.ledger.trade_count().await, 0);
}

#[tokio::test]
async fn gate_outside_window_and_force() {
    let h = harness(vec![("alpha", ScriptedProvider::fixed(HOLD))]).await;
    // 12:00 local, between windows
    let lunch = Utc.with_ymd_and_hms(2026, 10, 16, 17, 0, 0).unwrap();

    let gated = h.runner.run_at(SessionRequest::new(), lunch).await.unwrap();
    assert_eq!(gated.state, SessionState::Skipped);
    assert!(gated.agents.is_empty());

    let forced = h.runner.run_at(SessionRequest::new().forced(), lunch).await.unwrap();
    assert_eq!(forced.state, SessionState::Completed);
    assert_eq!(forced.agents.len(), 1);
    assert_eq!(h.ledger.decisions_for("alpha").await[0].slot, "2026-10-16#forced");

    // Force never overrides competition dates
    let next_year = Utc.with_ymd_and_hms(2027, 3, 1, 15, 0, 0).unwrap();
    let after_end = h.runner.run_at(SessionRequest::new().forced(), next_year).await.unwrap();
    assert_eq!(after_end.state, SessionState::Skipped);
}

#[tokio::test]
async fn single_agent_request_only_touches_that_agent() {
    let h = harness(vec![
        ("alpha", ScriptedProvider::fixed(HOLD)),
        ("beta", ScriptedProvider::fixed(HOLD)),
    ])
    .await;

    let report = h
        .runner
        .run_at(SessionRequest::new().for_agent("beta"), in_window())
        .await
        .unwrap();
    assert_eq!(report.agents.len(), 1);
    assert_eq!(report.agents[0].agent_id, "beta");
    assert!(h.ledger.decisions_for("alpha").await.is_empty());
}

#[tokio::test]
async fn oversized_quantity_fails_one_agent_without_aborting_the_session() {
    let h = harness(vec![
        (
            "alpha",
            ScriptedProvider::fixed(
                r#"{"sentiment":"bullish","actions":[{"action":"buy","symbol":"AAPL","quantity":1e28}]}"#,
            ),
        ),
        ("beta", ScriptedProvider::fixed(BUY_AAPL)),
    ])
    .await;

    let report = h.runner.run_at(SessionRequest::new(), in_window()).await.unwrap();

    let alpha = report.result_for("alpha").unwrap();
    assert_eq!(alpha.status, AgentRunStatus::Failed);
    assert!(alpha.error.as_deref().unwrap().contains("quantity"));
    assert_eq!(report.result_for("beta").unwrap().status, AgentRunStatus::Executed);
    assert_eq!(h.ledger.trade_count().await, 1);
}

#[tokio::test]
async fn request_budget_bounds_a_hung_provider_across_retries() {
    let ledger = Arc::new(MemoryLedger::new());
    let agent = Agent::new("alpha", "alpha", ProviderKind::Scripted, "script", dec!(10000), CompetitionMode::Baseline);
    ledger.insert_agent(&agent).await.unwrap();

    // Unbounded, three 3s attempts would hold the runner for about 9s
    let retry = RetryPolicy {
        base_delay: Duration::from_millis(10),
        jitter: 0.0,
        ..RetryPolicy::default()
    };
    let mut providers = ProviderRegistry::new();
    providers.insert(
        "alpha",
        DecisionAdapter::new(
            Arc::new(ScriptedProvider::fixed(HOLD).with_delay(Duration::from_secs(5))),
            retry,
            Duration::from_secs(3),
        ),
    );
    let quotes = Arc::new(StaticQuoteResolver::with_prices([("AAPL", dec!(100))]));
    let runner = SessionRunner::new(Arc::new(config()), ledger.clone(), quotes, providers).unwrap();

    let started = std::time::Instant::now();
    let report = runner
        .run_at(SessionRequest::new().with_budget(Duration::from_secs(1)), in_window())
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    let alpha = report.result_for("alpha").unwrap();
    assert_eq!(alpha.status, AgentRunStatus::Failed);
    assert!(alpha.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(ledger.decisions_for("alpha").await[0].outcome, DecisionOutcome::Failed);
}
