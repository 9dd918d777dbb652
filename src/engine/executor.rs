use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::rules::ModeRules;
use crate::domain::{
    portfolio_value, Agent, CompetitionConfig, Position, ProposedAction, TradeRecord,
};
use crate::error::{ArenaError, RejectReason, Result};
use crate::ledger::{AgentLocks, LedgerStore, PositionChange, TradeCommit};

/// Outcome of one proposed trade
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Executed { trade: TradeRecord },
    /// Passed validation on a dry run; nothing was written
    Simulated { trade: TradeRecord },
    Rejected { reason: RejectReason },
}

impl ExecutionResult {
    pub fn trade(&self) -> Option<&TradeRecord> {
        match self {
            ExecutionResult::Executed { trade } | ExecutionResult::Simulated { trade } => {
                Some(trade)
            }
            ExecutionResult::Rejected { .. } => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ExecutionResult::Rejected { .. })
    }
}

/// A validated trade and everything it would write
#[derive(Debug, Clone)]
pub struct TradePlan {
    pub agent_after: Agent,
    pub position: PositionChange,
    pub trade: TradeRecord,
}

fn share_pct(share: Decimal) -> f64 {
    (share * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

/// Validate `action` against the agent's current state and build the writes.
///
/// Checks run in a fixed order and the first failure wins. Pure: nothing is
/// read from or written to the ledger here.
#[allow(clippy::too_many_arguments)]
pub fn plan_trade(
    agent: &Agent,
    position: Option<&Position>,
    portfolio_value: Decimal,
    action: &ProposedAction,
    price: Decimal,
    competition: &CompetitionConfig,
    rules: &ModeRules,
    now: DateTime<Utc>,
) -> std::result::Result<TradePlan, RejectReason> {
    let side = action
        .side
        .trade_side()
        .ok_or(RejectReason::HoldNotExecutable)?;

    let quantity = action.quantity;
    if quantity <= Decimal::ZERO {
        return Err(RejectReason::InvalidQuantity {
            quantity: quantity.to_string(),
        });
    }
    if price <= Decimal::ZERO {
        return Err(RejectReason::InvalidPrice { price });
    }

    // Provider quantities are bounded, but a Decimal overflow must stay a rejection
    let overflow = || RejectReason::InvalidQuantity {
        quantity: quantity.to_string(),
    };
    let notional = quantity.checked_mul(price).ok_or_else(overflow)?;
    if notional < competition.min_trade_value {
        return Err(RejectReason::BelowMinimumNotional {
            notional,
            minimum: competition.min_trade_value,
        });
    }
    let fee = competition.fee_for(notional).ok_or_else(overflow)?;

    let mut agent_after = agent.clone();
    agent_after.total_trades += 1;
    agent_after.last_trade_at = Some(now);

    let (position_change, realized_pnl, projected_share) = if side.is_adding() {
        let existing_value = match position {
            Some(p) => p.quantity.checked_mul(price).ok_or_else(overflow)?,
            None => Decimal::ZERO,
        };
        let projected = existing_value.checked_add(notional).ok_or_else(overflow)?;
        let projected_share = if portfolio_value > Decimal::ZERO {
            projected
                .checked_div(portfolio_value)
                .ok_or_else(overflow)?
        } else {
            Decimal::ONE
        };
        if projected_share > competition.max_position_pct {
            return Err(RejectReason::ExceedsPositionCap {
                projected_pct: share_pct(projected_share),
                cap_pct: share_pct(competition.max_position_pct),
            });
        }
        let required = notional.checked_add(fee).ok_or_else(overflow)?;
        if required > agent.cash {
            return Err(RejectReason::InsufficientCapital {
                required,
                available: agent.cash,
            });
        }

        agent_after.cash -= required;
        let change = match position {
            Some(p) => {
                let mut merged = p.merged_with(quantity, price);
                merged.updated_at = now;
                PositionChange::Update(merged)
            }
            None => {
                let mut opened = Position::open(&agent.id, &action.symbol, quantity, price);
                opened.opened_at = now;
                opened.updated_at = now;
                PositionChange::Open(opened)
            }
        };
        (change, None, projected_share)
    } else {
        let held = position.map(|p| p.quantity).unwrap_or_default();
        let Some(existing) = position.filter(|_| held >= quantity) else {
            return Err(RejectReason::InsufficientShares {
                requested: quantity,
                held,
            });
        };

        let realized = (price - existing.avg_price)
            .checked_mul(quantity)
            .ok_or_else(overflow)?
            - fee;
        agent_after.cash = agent_after
            .cash
            .checked_add(notional - fee)
            .ok_or_else(overflow)?;
        agent_after.realized_pnl = agent_after
            .realized_pnl
            .checked_add(realized)
            .ok_or_else(overflow)?;
        if realized > Decimal::ZERO {
            agent_after.winning_trades += 1;
        }
        let change = match existing.reduced_by(quantity, price) {
            Some(mut rest) => {
                rest.updated_at = now;
                PositionChange::Update(rest)
            }
            None => PositionChange::Close {
                symbol: existing.symbol.clone(),
                version: existing.version,
            },
        };
        (change, Some(realized), Decimal::ZERO)
    };

    rules.check(agent.mode, action, side, projected_share)?;

    let trade = TradeRecord {
        id: Uuid::new_v4(),
        agent_id: agent.id.clone(),
        session_id: None,
        symbol: action.symbol.clone(),
        side,
        quantity,
        price,
        fee,
        notional,
        realized_pnl,
        leverage: action.leverage,
        rationale: action.rationale.clone(),
        executed_at: now,
    };

    Ok(TradePlan {
        agent_after,
        position: position_change,
        trade,
    })
}

/// Validates and applies proposed trades against the ledger
pub struct TradeExecutor {
    ledger: Arc<dyn LedgerStore>,
    locks: AgentLocks,
    rules: ModeRules,
}

impl TradeExecutor {
    pub fn new(ledger: Arc<dyn LedgerStore>, locks: AgentLocks, rules: ModeRules) -> Self {
        Self {
            ledger,
            locks,
            rules,
        }
    }

    pub fn rules(&self) -> &ModeRules {
        &self.rules
    }

    /// Validate and, unless `dry_run`, execute one action at `price`.
    ///
    /// Holds the agent's lock for the whole read-validate-commit sequence. A
    /// version conflict at commit is retried once from a fresh read; a second
    /// one is returned as an error.
    pub async fn execute(
        &self,
        competition: &CompetitionConfig,
        agent_id: &str,
        action: &ProposedAction,
        price: Decimal,
        session_id: Option<Uuid>,
        dry_run: bool,
    ) -> Result<ExecutionResult> {
        let _guard = self.locks.lock(agent_id).await;

        let mut attempt = 0;
        loop {
            attempt += 1;

            let agent = self
                .ledger
                .get_agent(agent_id)
                .await?
                .ok_or_else(|| ArenaError::AgentNotFound(agent_id.to_string()))?;
            let positions = self.ledger.get_positions(agent_id).await?;
            let position = positions.iter().find(|p| p.symbol == action.symbol);
            let value = portfolio_value(agent.cash, &positions);

            let plan = match plan_trade(
                &agent,
                position,
                value,
                action,
                price,
                competition,
                &self.rules,
                Utc::now(),
            ) {
                Ok(plan) => plan,
                Err(reason) => {
                    info!(
                        agent = %agent_id,
                        symbol = %action.symbol,
                        side = action.side.as_str(),
                        reason = reason.code(),
                        detail = %reason,
                        "trade rejected"
                    );
                    return Ok(ExecutionResult::Rejected { reason });
                }
            };

            let mut trade = plan.trade;
            trade.session_id = session_id;

            if dry_run {
                info!(
                    agent = %agent_id,
                    symbol = %trade.symbol,
                    side = %trade.side,
                    quantity = %trade.quantity,
                    price = %trade.price,
                    "dry run: trade simulated"
                );
                return Ok(ExecutionResult::Simulated { trade });
            }

            let commit = TradeCommit {
                agent: plan.agent_after,
                position: plan.position,
                trade,
            };

            match self.ledger.commit_trade(&commit).await {
                Ok(()) => {
                    info!(
                        agent = %agent_id,
                        symbol = %commit.trade.symbol,
                        side = %commit.trade.side,
                        quantity = %commit.trade.quantity,
                        price = %commit.trade.price,
                        fee = %commit.trade.fee,
                        "trade executed"
                    );
                    return Ok(ExecutionResult::Executed {
                        trade: commit.trade,
                    });
                }
                Err(e) if e.is_conflict() && attempt == 1 => {
                    warn!(agent = %agent_id, error = %e, "version conflict, re-reading state");
                }
                Err(e) => {
                    error!(
                        alert = "ledger_drift",
                        agent = %agent_id,
                        symbol = %action.symbol,
                        attempt,
                        error = %e,
                        "trade validated but could not be persisted"
                    );
                    return Err(e);
                }
            }
        }
    }
}
