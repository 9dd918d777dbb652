//! Persistent state of the competition
//!
//! The [`LedgerStore`] trait owns agents, positions, trades, decisions,
//! snapshots and the competition row. Two implementations exist:
//! - [`MemoryLedger`] for offline runs and tests
//! - [`crate::adapters::PostgresLedger`] for production

pub mod memory;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{
    Agent, CompetitionConfig, DailySnapshot, DecisionRecord, Position, TradeRecord,
};
use crate::error::Result;

pub use memory::MemoryLedger;

/// Effect of a trade on the agent's position in one symbol
#[derive(Debug, Clone)]
pub enum PositionChange {
    /// No prior position; insert this one
    Open(Position),
    /// Replace the stored position; `version` is the one that was read
    Update(Position),
    /// Delete the position read at `version`
    Close { symbol: String, version: i64 },
}

impl PositionChange {
    pub fn symbol(&self) -> &str {
        match self {
            PositionChange::Open(p) | PositionChange::Update(p) => &p.symbol,
            PositionChange::Close { symbol, .. } => symbol,
        }
    }
}

/// Everything one executed trade writes, committed atomically.
///
/// `agent` holds the post-trade values with the version that was read; the
/// store bumps it on success and reports a conflict if it moved meanwhile.
#[derive(Debug, Clone)]
pub struct TradeCommit {
    pub agent: Agent,
    pub position: PositionChange,
    pub trade: TradeRecord,
}

/// One agent's place on the board
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Standing {
    pub agent_id: String,
    pub portfolio_value: Decimal,
    pub rank: i32,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ==================== Competition ====================

    async fn get_competition(&self) -> Result<Option<CompetitionConfig>>;

    async fn upsert_competition(&self, competition: &CompetitionConfig) -> Result<()>;

    // ==================== Agents ====================

    /// Insert an agent; an existing row with the same id is left untouched.
    /// Returns whether a row was created.
    async fn insert_agent(&self, agent: &Agent) -> Result<bool>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>>;

    /// All agents ordered by id
    async fn list_agents(&self) -> Result<Vec<Agent>>;

    // ==================== Positions ====================

    async fn get_positions(&self, agent_id: &str) -> Result<Vec<Position>>;

    async fn get_position(&self, agent_id: &str, symbol: &str) -> Result<Option<Position>>;

    /// Mark positions to market; symbols without a price keep their last one
    async fn mark_positions(&self, agent_id: &str, prices: &HashMap<String, Decimal>)
        -> Result<()>;

    // ==================== Trades ====================

    /// Apply a trade atomically, checking agent and position versions
    async fn commit_trade(&self, commit: &TradeCommit) -> Result<()>;

    /// Most recent first
    async fn recent_trades(&self, agent_id: &str, limit: usize) -> Result<Vec<TradeRecord>>;

    /// Oldest first
    async fn list_trades(&self, agent_id: &str) -> Result<Vec<TradeRecord>>;

    // ==================== Decisions ====================

    async fn record_decision(&self, record: &DecisionRecord) -> Result<()>;

    async fn has_decision_in_slot(&self, agent_id: &str, slot: &str) -> Result<bool>;

    // ==================== Valuation ====================

    /// Store portfolio values and ranks for every agent in `standings`
    async fn update_rankings(&self, standings: &[Standing]) -> Result<()>;

    async fn upsert_snapshot(&self, snapshot: &DailySnapshot) -> Result<()>;

    /// Oldest first
    async fn list_snapshots(&self, agent_id: &str) -> Result<Vec<DailySnapshot>>;
}

/// Per-agent exclusive sections around validate -> execute
#[derive(Debug, Default, Clone)]
pub struct AgentLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AgentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the agent's lock; released when the guard drops
    pub async fn lock(&self, agent_id: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
