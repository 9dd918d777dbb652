//! Per-agent performance statistics
//!
//! Money stays in `Decimal` until the final ratios; statistics are `f64`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Agent, DailySnapshot, TradeRecord};

const TRADING_DAYS: f64 = 252.0;
const SHARPE_CLAMP: f64 = 3.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_trades: i64,
    pub winning_trades: i64,
    /// winning / total trades, 0..=1
    pub win_rate: f64,
    pub avg_win: f64,
    /// Magnitude of the average losing trade
    pub avg_loss: f64,
    pub expectancy: f64,
    /// Serialized as `null` when infinite
    pub profit_factor: f64,
    pub sharpe: f64,
    /// Largest peak-to-trough decline in percent
    pub max_drawdown_pct: f64,
    pub avg_trade_size: f64,
    pub median_trade_size: f64,
    pub avg_hold_hours: f64,
    pub median_hold_hours: f64,
    pub total_return_pct: f64,
    pub realized_pnl: f64,
}

fn f(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// gross profit / |gross loss|; infinite with no losses, 0 with no profit
pub fn profit_factor(realized: &[Decimal]) -> f64 {
    let gross_profit: Decimal = realized.iter().filter(|p| **p > Decimal::ZERO).sum();
    let gross_loss: Decimal = realized
        .iter()
        .filter(|p| **p < Decimal::ZERO)
        .map(|p| p.abs())
        .sum();

    if gross_profit.is_zero() {
        0.0
    } else if gross_loss.is_zero() {
        f64::INFINITY
    } else {
        f(gross_profit / gross_loss)
    }
}

/// Simple returns between consecutive values
pub fn daily_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Sharpe-style ratio over daily returns, clamped to [-3, 3]
pub fn sharpe_ratio(returns: &[f64], annual_risk_free: f64) -> f64 {
    let n = returns.len();
    if n < 2 {
        return 0.0;
    }
    let daily_rf = annual_risk_free / TRADING_DAYS;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let mean_excess = mean(&excess);
    let variance = excess
        .iter()
        .map(|r| (r - mean_excess).powi(2))
        .sum::<f64>()
        / (n - 1) as f64;
    let std_dev = variance.sqrt();

    if std_dev <= f64::EPSILON {
        return if mean_excess > 0.0 { SHARPE_CLAMP } else { 0.0 };
    }

    let ratio = mean_excess / std_dev * (TRADING_DAYS / n as f64).sqrt();
    ratio.clamp(-SHARPE_CLAMP, SHARPE_CLAMP)
}

/// Largest peak-to-trough decline in percent
pub fn max_drawdown_pct(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for v in values {
        if *v > peak {
            peak = *v;
        }
        if peak > 0.0 {
            max_dd = max_dd.max((peak - v) / peak * 100.0);
        }
    }
    max_dd
}

/// Compute every metric for one agent.
///
/// `trades` and `snapshots` must be ordered oldest first.
pub fn compute(
    agent: &Agent,
    trades: &[TradeRecord],
    snapshots: &[DailySnapshot],
    annual_risk_free: f64,
) -> PerformanceMetrics {
    let win_rate = if agent.total_trades > 0 {
        agent.winning_trades as f64 / agent.total_trades as f64
    } else {
        0.0
    };

    let realized: Vec<Decimal> = trades.iter().filter_map(|t| t.realized_pnl).collect();
    let wins: Vec<f64> = realized
        .iter()
        .filter(|p| **p > Decimal::ZERO)
        .map(|p| f(*p))
        .collect();
    let losses: Vec<f64> = realized
        .iter()
        .filter(|p| **p < Decimal::ZERO)
        .map(|p| f(p.abs()))
        .collect();
    let avg_win = mean(&wins);
    let avg_loss = mean(&losses);

    let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

    let values: Vec<f64> = snapshots.iter().map(|s| f(s.portfolio_value)).collect();

    let sizes: Vec<f64> = trades.iter().map(|t| f(t.notional)).collect();
    let holds: Vec<f64> = trades
        .windows(2)
        .map(|w| (w[1].executed_at - w[0].executed_at).num_seconds() as f64 / 3600.0)
        .collect();

    PerformanceMetrics {
        total_trades: agent.total_trades,
        winning_trades: agent.winning_trades,
        win_rate,
        avg_win,
        avg_loss,
        expectancy,
        profit_factor: profit_factor(&realized),
        sharpe: sharpe_ratio(&daily_returns(&values), annual_risk_free),
        max_drawdown_pct: max_drawdown_pct(&values),
        avg_trade_size: mean(&sizes),
        median_trade_size: median(&sizes),
        avg_hold_hours: mean(&holds),
        median_hold_hours: median(&holds),
        total_return_pct: agent.total_return_pct(),
        realized_pnl: f(agent.realized_pnl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CompetitionMode, ProviderKind, TradeSide};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade(hours: i64, notional: Decimal, realized: Option<Decimal>) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            agent_id: "a".into(),
            session_id: None,
            symbol: "X".into(),
            side: if realized.is_some() { TradeSide::Sell } else { TradeSide::Buy },
            quantity: dec!(1),
            price: notional,
            fee: Decimal::ZERO,
            notional,
            realized_pnl: realized,
            leverage: None,
            rationale: String::new(),
            executed_at: Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap() + Duration::hours(hours),
        }
    }

    #[test]
    fn test_profit_factor_edges() {
        assert_eq!(profit_factor(&[]), 0.0);
        assert_eq!(profit_factor(&[dec!(10), dec!(5)]), f64::INFINITY);
        assert_eq!(profit_factor(&[dec!(-10)]), 0.0);
        assert_eq!(profit_factor(&[dec!(30), dec!(-10)]), 3.0);
    }

    #[test]
    fn test_sharpe_edges() {
        assert_eq!(sharpe_ratio(&[0.01], 0.02), 0.0);
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.02), 3.0);
        assert_eq!(sharpe_ratio(&[-0.01, -0.01], 0.02), 0.0);
        let s = sharpe_ratio(&[0.01, -0.02, 0.015, 0.003], 0.02);
        assert!((-3.0..=3.0).contains(&s));
        assert!(sharpe_ratio(&[0.05, 0.04, 0.06], 0.02) <= 3.0);
    }

    #[test]
    fn test_max_drawdown() {
        assert_eq!(max_drawdown_pct(&[]), 0.0);
        let dd = max_drawdown_pct(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        assert!((dd - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_for_agent() {
        let mut agent =
            Agent::new("a", "A", ProviderKind::Scripted, "m", dec!(10000), CompetitionMode::Baseline);
        agent.total_trades = 4;
        agent.winning_trades = 1;
        agent.portfolio_value = dec!(11000);
        let trades = vec![
            trade(0, dec!(1000), None),
            trade(2, dec!(1100), Some(dec!(100))),
            trade(4, dec!(500), None),
            trade(10, dec!(450), Some(dec!(-50))),
        ];
        let m = compute(&agent, &trades, &[], 0.02);
        assert_eq!(m.win_rate, 0.25);
        assert_eq!(m.avg_win, 100.0);
        assert_eq!(m.avg_loss, 50.0);
        // Same win rate as the headline one: 0.25 * 100 - 0.75 * 50
        assert_eq!(m.expectancy, -12.5);
        assert_eq!(m.profit_factor, 2.0);
        assert_eq!(m.avg_trade_size, 762.5);
        assert_eq!(m.median_trade_size, 750.0);
        assert_eq!(m.median_hold_hours, 2.0);
        assert!((m.avg_hold_hours - 10.0 / 3.0).abs() < 1e-9);
        assert!((m.total_return_pct - 10.0).abs() < 1e-9);
        assert_eq!(m.sharpe, 0.0);
    }
}
