//! In-process ledger behind a `tokio::sync::RwLock`

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{LedgerStore, PositionChange, Standing, TradeCommit};
use crate::domain::{
    Agent, CompetitionConfig, DailySnapshot, DecisionRecord, Position, TradeRecord,
};
use crate::error::{ArenaError, Result};

#[derive(Default)]
struct LedgerState {
    competition: Option<CompetitionConfig>,
    agents: BTreeMap<String, Agent>,
    /// agent id -> symbol -> position
    positions: HashMap<String, BTreeMap<String, Position>>,
    trades: Vec<TradeRecord>,
    decisions: Vec<DecisionRecord>,
    snapshots: BTreeMap<(String, NaiveDate), DailySnapshot>,
}

/// Ledger kept entirely in memory; same version semantics as Postgres
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
    forced_conflicts: AtomicUsize,
    failed_decision_writes: AtomicUsize,
    failed_position_reads: AtomicUsize,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with a version conflict, as if another
    /// writer had touched the agent in between.
    pub fn inject_conflicts(&self, n: usize) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    fn take_forced_conflict(&self) -> bool {
        take_one(&self.forced_conflicts)
    }

    /// Make the next `n` decision writes fail
    pub fn inject_decision_write_failures(&self, n: usize) {
        self.failed_decision_writes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` position reads fail
    pub fn inject_position_read_failures(&self, n: usize) {
        self.failed_position_reads.store(n, Ordering::SeqCst);
    }

    /// Total trades stored across all agents
    pub async fn trade_count(&self) -> usize {
        self.state.read().await.trades.len()
    }

    /// Decision records for one agent, oldest first
    pub async fn decisions_for(&self, agent_id: &str) -> Vec<DecisionRecord> {
        self.state
            .read()
            .await
            .decisions
            .iter()
            .filter(|d| d.agent_id == agent_id)
            .cloned()
            .collect()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn conflict(entity: &'static str, id: &str, expected: i64) -> ArenaError {
    ArenaError::VersionConflict {
        entity,
        id: id.to_string(),
        expected,
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn get_competition(&self) -> Result<Option<CompetitionConfig>> {
        Ok(self.state.read().await.competition.clone())
    }

    async fn upsert_competition(&self, competition: &CompetitionConfig) -> Result<()> {
        self.state.write().await.competition = Some(competition.clone());
        Ok(())
    }

    async fn insert_agent(&self, agent: &Agent) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.agents.contains_key(&agent.id) {
            return Ok(false);
        }
        state.agents.insert(agent.id.clone(), agent.clone());
        Ok(true)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        Ok(self.state.read().await.agents.get(agent_id).cloned())
    }

    async fn list_agents(&self) -> Result<Vec<Agent>> {
        Ok(self.state.read().await.agents.values().cloned().collect())
    }

    async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>> {
        if take_one(&self.failed_position_reads) {
            return Err(ArenaError::Internal("injected position read failure".into()));
        }
        Ok(self
            .state
            .read()
            .await
            .positions
            .get(agent_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_position(&self, agent_id: &str, symbol: &str) -> Result<Option<Position>> {
        Ok(self
            .state
            .read()
            .await
            .positions
            .get(agent_id)
            .and_then(|m| m.get(symbol))
            .cloned())
    }

    async fn mark_positions(
        &self,
        agent_id: &str,
        prices: &HashMap<String, Decimal>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(positions) = state.positions.get_mut(agent_id) {
            for (symbol, pos) in positions.iter_mut() {
                if let Some(price) = prices.get(symbol) {
                    pos.current_price = *price;
                }
            }
        }
        Ok(())
    }

    #[instrument(skip(self, commit), fields(agent = %commit.agent.id, symbol = %commit.trade.symbol))]
    async fn commit_trade(&self, commit: &TradeCommit) -> Result<()> {
        let mut state = self.state.write().await;
        let agent_id = commit.agent.id.as_str();

        let stored = state
            .agents
            .get(agent_id)
            .ok_or_else(|| ArenaError::AgentNotFound(agent_id.to_string()))?;
        if stored.version != commit.agent.version || self.take_forced_conflict() {
            return Err(conflict("agent", agent_id, commit.agent.version));
        }
        if commit.agent.cash < Decimal::ZERO {
            return Err(ArenaError::LedgerInvariant(format!(
                "cash of {agent_id} would go negative ({})",
                commit.agent.cash
            )));
        }

        // Check the position before mutating anything
        let existing = state
            .positions
            .get(agent_id)
            .and_then(|m| m.get(commit.position.symbol()));
        match (&commit.position, existing) {
            (PositionChange::Open(p), Some(_)) => {
                return Err(conflict("position", &p.symbol, -1));
            }
            (PositionChange::Update(p), Some(cur)) if cur.version != p.version => {
                return Err(conflict("position", &p.symbol, p.version));
            }
            (PositionChange::Close { symbol, version }, Some(cur)) if cur.version != *version => {
                return Err(conflict("position", symbol, *version));
            }
            (PositionChange::Update(p), None) => {
                return Err(conflict("position", &p.symbol, p.version));
            }
            (PositionChange::Close { symbol, version }, None) => {
                return Err(conflict("position", symbol, *version));
            }
            _ => {}
        }

        let positions = state.positions.entry(agent_id.to_string()).or_default();
        match &commit.position {
            PositionChange::Open(p) => {
                positions.insert(p.symbol.clone(), p.clone());
            }
            PositionChange::Update(p) => {
                let mut next = p.clone();
                next.version += 1;
                positions.insert(p.symbol.clone(), next);
            }
            PositionChange::Close { symbol, .. } => {
                positions.remove(symbol);
            }
        }

        let mut agent = commit.agent.clone();
        agent.version += 1;
        state.agents.insert(agent.id.clone(), agent);
        state.trades.push(commit.trade.clone());

        debug!(trade_id = %commit.trade.id, "trade committed");
        Ok(())
    }

    async fn recent_trades(&self, agent_id: &str, limit: usize) -> Result<Vec<TradeRecord>> {
        let state = self.state.read().await;
        let mut trades: Vec<_> = state
            .trades
            .iter()
            .filter(|t| t.agent_id == agent_id)
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn list_trades(&self, agent_id: &str) -> Result<Vec<TradeRecord>> {
        let state = self.state.read().await;
        let mut trades: Vec<_> = state
            .trades
            .iter()
            .filter(|t| t.agent_id == agent_id)
            .cloned()
            .collect();
        trades.sort_by(|a, b| a.executed_at.cmp(&b.executed_at));
        Ok(trades)
    }

    async fn record_decision(&self, record: &DecisionRecord) -> Result<()> {
        if take_one(&self.failed_decision_writes) {
            return Err(ArenaError::Internal("injected decision write failure".into()));
        }
        self.state.write().await.decisions.push(record.clone());
        Ok(())
    }

    async fn has_decision_in_slot(&self, agent_id: &str, slot: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .decisions
            .iter()
            .any(|d| d.agent_id == agent_id && d.slot == slot))
    }

    async fn update_rankings(&self, standings: &[Standing]) -> Result<()> {
        let mut state = self.state.write().await;
        for standing in standings {
            if let Some(agent) = state.agents.get_mut(&standing.agent_id) {
                agent.portfolio_value = standing.portfolio_value;
                agent.rank = Some(standing.rank);
            }
        }
        Ok(())
    }

    async fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        self.state.write().await.snapshots.insert(
            (snapshot.agent_id.clone(), snapshot.date),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn list_snapshots(&self, agent_id: &str) -> Result<Vec<DailySnapshot>> {
        Ok(self
            .state
            .read()
            .await
            .snapshots
            .iter()
            .filter(|((id, _), _)| id == agent_id)
            .map(|(_, s)| s.clone())
            .collect())
    }
}
