use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Competition-wide trading rules, read-only during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitionConfig {
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Fraction of notional charged per side (0.0015 = 0.15%)
    pub fee_rate: Decimal,
    /// Minimum notional for any executed trade
    pub min_trade_value: Decimal,
    /// Maximum single-position share of portfolio value (0.30 = 30%)
    pub max_position_pct: Decimal,
    pub active: bool,
}

impl CompetitionConfig {
    /// Fee on `notional`, rounded to cents; `None` on overflow
    pub fn fee_for(&self, notional: Decimal) -> Option<Decimal> {
        notional.checked_mul(self.fee_rate).map(|fee| {
            fee.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        })
    }

    /// Whether the exchange-local date falls inside the competition (inclusive)
    pub fn covers(&self, local_date: NaiveDate) -> bool {
        local_date >= self.start_date && local_date <= self.end_date
    }
}

/// One row per agent per calendar day, written by the snapshot job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub agent_id: String,
    pub date: NaiveDate,
    pub portfolio_value: Decimal,
    pub cash: Decimal,
    pub holdings_value: Decimal,
    pub daily_change: Decimal,
    pub cumulative_return_pct: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> CompetitionConfig {
        CompetitionConfig {
            name: "test".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            fee_rate: dec!(0.0015),
            min_trade_value: dec!(100),
            max_position_pct: dec!(0.30),
            active: true,
        }
    }

    #[test]
    fn fee_is_flat_percentage_rounded_to_cents() {
        let c = config();
        assert_eq!(c.fee_for(dec!(1000)), Some(dec!(1.50)));
        assert_eq!(c.fee_for(dec!(1100)), Some(dec!(1.65)));
        assert_eq!(c.fee_for(dec!(333.33)), Some(dec!(0.50)));
    }

    #[test]
    fn date_range_is_inclusive() {
        let c = config();
        assert!(c.covers(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()));
        assert!(!c.covers(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap()));
    }
}
