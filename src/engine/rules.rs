//! Competition-mode rule bundles applied after the standard trade checks

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::ModeRulesConfig;
use crate::domain::{CompetitionMode, ProposedAction, TradeSide};
use crate::error::RejectReason;

#[derive(Debug, Clone)]
pub struct ModeRules {
    pub preservation_max_position_pct: Decimal,
    pub min_leverage: Decimal,
    pub max_leverage: Decimal,
}

impl Default for ModeRules {
    fn default() -> Self {
        Self::from(&ModeRulesConfig::default())
    }
}

impl From<&ModeRulesConfig> for ModeRules {
    fn from(cfg: &ModeRulesConfig) -> Self {
        Self {
            preservation_max_position_pct: cfg.preservation_max_position_pct,
            min_leverage: cfg.min_leverage,
            max_leverage: cfg.max_leverage,
        }
    }
}

fn pct(fraction: Decimal) -> f64 {
    (fraction * Decimal::ONE_HUNDRED).to_f64().unwrap_or(0.0)
}

impl ModeRules {
    /// Check a trade that already passed the standard rules.
    ///
    /// `projected_share` is the position's share of the portfolio after the
    /// trade, only meaningful for adding trades.
    pub fn check(
        &self,
        mode: CompetitionMode,
        action: &ProposedAction,
        side: TradeSide,
        projected_share: Decimal,
    ) -> Result<(), RejectReason> {
        match mode {
            CompetitionMode::Baseline | CompetitionMode::SeeCompetitors => Ok(()),
            CompetitionMode::LeverageRequired => match action.leverage {
                Some(l) if l >= self.min_leverage && l <= self.max_leverage => Ok(()),
                Some(l) => Err(RejectReason::ModeViolation {
                    mode: mode.as_str().to_string(),
                    detail: format!(
                        "leverage {l} outside [{}, {}]",
                        self.min_leverage, self.max_leverage
                    ),
                }),
                None => Err(RejectReason::ModeViolation {
                    mode: mode.as_str().to_string(),
                    detail: "leverage must be declared".to_string(),
                }),
            },
            CompetitionMode::CapitalPreservation => {
                if !side.is_adding() {
                    return Ok(());
                }
                if projected_share > self.preservation_max_position_pct {
                    return Err(RejectReason::ExceedsPositionCap {
                        projected_pct: pct(projected_share),
                        cap_pct: pct(self.preservation_max_position_pct),
                    });
                }
                if action.stop_loss.is_none() {
                    return Err(RejectReason::ModeViolation {
                        mode: mode.as_str().to_string(),
                        detail: "entries require a stop_loss".to_string(),
                    });
                }
                Ok(())
            }
        }
    }

    /// Rule text shown to an agent competing under `mode`
    pub fn describe(&self, mode: CompetitionMode) -> String {
        match mode {
            CompetitionMode::Baseline => {
                "Standard rules apply. No additional constraints.".to_string()
            }
            CompetitionMode::CapitalPreservation => format!(
                "Capital preservation mode: no single position may exceed {:.0}% of your \
                 portfolio, and every buy must include a stop_loss price.",
                pct(self.preservation_max_position_pct)
            ),
            CompetitionMode::LeverageRequired => format!(
                "Leverage mode: every buy and sell must declare a leverage between {} and {}.",
                self.min_leverage.normalize(),
                self.max_leverage.normalize()
            ),
            CompetitionMode::SeeCompetitors => {
                "Competitive mode: the current leaderboard is included in your brief. \
                 Standard rules apply."
                    .to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_leverage_required() {
        let rules = ModeRules::default();
        let mode = CompetitionMode::LeverageRequired;
        let buy = ProposedAction::buy("X", dec!(1));
        assert!(matches!(
            rules.check(mode, &buy, TradeSide::Buy, dec!(0.1)),
            Err(RejectReason::ModeViolation { .. })
        ));
        let ok = buy.clone().with_leverage(dec!(2));
        assert!(rules.check(mode, &ok, TradeSide::Buy, dec!(0.1)).is_ok());
        let high = buy.with_leverage(dec!(5));
        assert!(rules.check(mode, &high, TradeSide::Buy, dec!(0.1)).is_err());
    }

    #[test]
    fn test_capital_preservation() {
        let rules = ModeRules::default();
        let mode = CompetitionMode::CapitalPreservation;
        let buy = ProposedAction::buy("X", dec!(1)).with_stop_loss(dec!(9));
        assert!(rules.check(mode, &buy, TradeSide::Buy, dec!(0.10)).is_ok());
        assert!(matches!(
            rules.check(mode, &buy, TradeSide::Buy, dec!(0.20)),
            Err(RejectReason::ExceedsPositionCap { .. })
        ));
        let no_stop = ProposedAction::buy("X", dec!(1));
        assert!(matches!(
            rules.check(mode, &no_stop, TradeSide::Buy, dec!(0.10)),
            Err(RejectReason::ModeViolation { .. })
        ));
        // Exits are never blocked
        let sell = ProposedAction::sell("X", dec!(1));
        assert!(rules.check(mode, &sell, TradeSide::Sell, dec!(0.9)).is_ok());
    }

    #[test]
    fn test_baseline_adds_nothing() {
        let rules = ModeRules::default();
        let buy = ProposedAction::buy("X", dec!(1));
        assert!(rules
            .check(CompetitionMode::Baseline, &buy, TradeSide::Buy, dec!(0.99))
            .is_ok());
        assert!(rules.describe(CompetitionMode::CapitalPreservation).contains("15%"));
    }
}
