use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use tabled::Tabled;

use super::performance::{compute, PerformanceMetrics};
use crate::domain::{Agent, CompetitionMode, ProviderKind};
use crate::error::Result;
use crate::ledger::{LedgerStore, Standing};

/// Order agents by portfolio value (desc), ties by id (asc), ranks from 1
pub fn rank_standings(values: &[(String, Decimal)]) -> Vec<Standing> {
    let mut sorted: Vec<_> = values.to_vec();
    sorted.sort_by(|(a_id, a_val), (b_id, b_val)| b_val.cmp(a_val).then_with(|| a_id.cmp(b_id)));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, (agent_id, portfolio_value))| Standing {
            agent_id,
            portfolio_value,
            rank: i as i32 + 1,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub rank: i32,
    pub agent_id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub model: String,
    pub mode: CompetitionMode,
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub total_return_pct: f64,
    pub metrics: PerformanceMetrics,
}

/// Recompute the full board from the ledger.
///
/// Ranks come from current portfolio values, not from stored ranks.
pub async fn build_leaderboard(
    ledger: &dyn LedgerStore,
    annual_risk_free: f64,
) -> Result<Vec<LeaderboardEntry>> {
    let agents = ledger.list_agents().await?;
    let values: Vec<_> = agents
        .iter()
        .map(|a| (a.id.clone(), a.portfolio_value))
        .collect();
    let standings = rank_standings(&values);

    let mut entries = Vec::with_capacity(agents.len());
    for standing in standings {
        let Some(agent) = agents.iter().find(|a| a.id == standing.agent_id) else {
            continue;
        };
        let trades = ledger.list_trades(&agent.id).await?;
        let snapshots = ledger.list_snapshots(&agent.id).await?;
        entries.push(entry(agent, standing.rank, compute(agent, &trades, &snapshots, annual_risk_free)));
    }
    Ok(entries)
}

fn entry(agent: &Agent, rank: i32, metrics: PerformanceMetrics) -> LeaderboardEntry {
    LeaderboardEntry {
        rank,
        agent_id: agent.id.clone(),
        name: agent.name.clone(),
        provider: agent.provider,
        model: agent.model.clone(),
        mode: agent.mode,
        portfolio_value: agent.portfolio_value,
        cash: agent.cash,
        total_return_pct: metrics.total_return_pct,
        metrics,
    }
}

/// Flat, printable view of an entry
#[derive(Debug, Serialize, Tabled)]
pub struct LeaderboardRow {
    #[tabled(rename = "#")]
    pub rank: i32,
    pub agent: String,
    pub model: String,
    pub value: String,
    #[tabled(rename = "return %")]
    pub return_pct: String,
    pub trades: i64,
    #[tabled(rename = "win %")]
    pub win_rate: String,
    #[tabled(rename = "PF")]
    pub profit_factor: String,
    pub sharpe: String,
    #[tabled(rename = "max DD %")]
    pub max_drawdown: String,
}

impl From<&LeaderboardEntry> for LeaderboardRow {
    fn from(e: &LeaderboardEntry) -> Self {
        let pf = e.metrics.profit_factor;
        Self {
            rank: e.rank,
            agent: e.name.clone(),
            model: e.model.clone(),
            value: format!("{:.2}", e.portfolio_value.to_f64().unwrap_or(0.0)),
            return_pct: format!("{:+.2}", e.total_return_pct),
            trades: e.metrics.total_trades,
            win_rate: format!("{:.1}", e.metrics.win_rate * 100.0),
            profit_factor: if pf.is_infinite() {
                "inf".to_string()
            } else {
                format!("{pf:.2}")
            },
            sharpe: format!("{:.2}", e.metrics.sharpe),
            max_drawdown: format!("{:.2}", e.metrics.max_drawdown_pct),
        }
    }
}
