//! Portfolio revaluation, ranking and daily snapshots

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::domain::{portfolio_value, DailySnapshot};
use crate::error::Result;
use crate::ledger::{LedgerStore, Standing};
use crate::metrics::rank_standings;

/// Recompute every agent's portfolio value from cash and last prices, rank
/// the whole field and persist both.
pub async fn refresh_rankings(ledger: &dyn LedgerStore) -> Result<Vec<Standing>> {
    let agents = ledger.list_agents().await?;
    let mut values = Vec::with_capacity(agents.len());
    for agent in &agents {
        let positions = ledger.get_positions(&agent.id).await?;
        values.push((agent.id.clone(), portfolio_value(agent.cash, &positions)));
    }

    let standings = rank_standings(&values);
    ledger.update_rankings(&standings).await?;

    if let Some(leader) = standings.first() {
        info!(
            agents = standings.len(),
            leader = %leader.agent_id,
            value = %leader.portfolio_value,
            "rankings updated"
        );
    }
    Ok(standings)
}

/// Write one snapshot per agent for `date`, replacing any earlier one
pub async fn take_snapshots(ledger: &dyn LedgerStore, date: NaiveDate) -> Result<Vec<DailySnapshot>> {
    let agents = ledger.list_agents().await?;
    let mut written = Vec::with_capacity(agents.len());

    for agent in &agents {
        let positions = ledger.get_positions(&agent.id).await?;
        let holdings: Decimal = positions.iter().map(|p| p.market_value()).sum();
        let value = agent.cash + holdings;

        let previous = ledger
            .list_snapshots(&agent.id)
            .await?
            .into_iter()
            .filter(|s| s.date < date)
            .last()
            .map(|s| s.portfolio_value)
            .unwrap_or(agent.starting_capital);

        let cumulative = if agent.starting_capital.is_zero() {
            Decimal::ZERO
        } else {
            ((value / agent.starting_capital - Decimal::ONE) * Decimal::ONE_HUNDRED).round_dp(4)
        };

        let snapshot = DailySnapshot {
            agent_id: agent.id.clone(),
            date,
            portfolio_value: value,
            cash: agent.cash,
            holdings_value: holdings,
            daily_change: value - previous,
            cumulative_return_pct: cumulative,
        };
        ledger.upsert_snapshot(&snapshot).await?;
        debug!(agent = %agent.id, %date, value = %value, "snapshot written");
        written.push(snapshot);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Agent, CompetitionMode, ProviderKind};
    use crate::ledger::MemoryLedger;
    use rust_decimal_macros::dec;

    async fn ledger() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        for (id, capital) in [("b", dec!(5000)), ("a", dec!(5000)), ("c", dec!(9000))] {
            let agent = Agent::new(id, id, ProviderKind::Scripted, "m", capital, CompetitionMode::Baseline);
            ledger.insert_agent(&agent).await.unwrap();
        }
        ledger
    }

    #[tokio::test]
    async fn test_refresh_ranks_by_value_then_id() {
        let ledger = ledger().await;
        let standings = refresh_rankings(&ledger).await.unwrap();
        let order: Vec<_> = standings.iter().map(|s| (s.agent_id.as_str(), s.rank)).collect();
        assert_eq!(order, vec![("c", 1), ("a", 2), ("b", 3)]);
        assert_eq!(ledger.get_agent("a").await.unwrap().unwrap().rank, Some(2));
    }

    #[tokio::test]
    async fn test_snapshot_change_is_relative_to_previous_day() {
        let ledger = ledger().await;
        let d1 = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();

        let first = take_snapshots(&ledger, d1).await.unwrap();
        assert_eq!(first.len(), 3);
        assert!(first.iter().all(|s| s.daily_change.is_zero()));

        let again = take_snapshots(&ledger, d2).await.unwrap();
        assert!(again.iter().all(|s| s.cumulative_return_pct.is_zero()));
        assert_eq!(ledger.list_snapshots("a").await.unwrap().len(), 2);
    }
}
