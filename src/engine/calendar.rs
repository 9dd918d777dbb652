//! Trading calendar and session gate
//!
//! All gate decisions are taken in the exchange's fixed UTC offset.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::config::TradingWindowConfig;
use crate::domain::CompetitionConfig;
use crate::error::{ArenaError, Result};

/// Why a session did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    CompetitionInactive,
    BeforeStart,
    AfterEnd,
    NonTradingDay,
    OutsideTradingWindow,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::CompetitionInactive => "competition_inactive",
            GateReason::BeforeStart => "before_start",
            GateReason::AfterEnd => "after_end",
            GateReason::NonTradingDay => "non_trading_day",
            GateReason::OutsideTradingWindow => "outside_trading_window",
        }
    }
}

impl std::fmt::Display for GateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "gate", rename_all = "snake_case")]
pub enum GateOutcome {
    /// Session may run; `slot` keys idempotence
    Open { slot: String, forced: bool },
    Closed { reason: GateReason },
}

impl GateOutcome {
    pub fn is_open(&self) -> bool {
        matches!(self, GateOutcome::Open { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TradingCalendar {
    offset: FixedOffset,
    weekdays: Vec<Weekday>,
    windows: Vec<(NaiveTime, NaiveTime)>,
}

fn parse_window(raw: &str) -> Result<(NaiveTime, NaiveTime)> {
    let bad = || ArenaError::Validation(format!("trading window '{raw}' is not HH:MM-HH:MM"));
    let (start, end) = raw.split_once('-').ok_or_else(bad)?;
    let start = NaiveTime::parse_from_str(start.trim(), "%H:%M").map_err(|_| bad())?;
    let end = NaiveTime::parse_from_str(end.trim(), "%H:%M").map_err(|_| bad())?;
    if end <= start {
        return Err(ArenaError::Validation(format!(
            "trading window '{raw}' ends before it starts"
        )));
    }
    Ok((start, end))
}

fn weekday(n: u32) -> Option<Weekday> {
    match n {
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        7 => Some(Weekday::Sun),
        _ => None,
    }
}

impl TradingCalendar {
    pub fn from_config(cfg: &TradingWindowConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(cfg.utc_offset_minutes * 60).ok_or_else(|| {
            ArenaError::Validation(format!(
                "trading_window.utc_offset_minutes {} out of range",
                cfg.utc_offset_minutes
            ))
        })?;
        let weekdays = cfg.weekdays.iter().filter_map(|d| weekday(*d)).collect();
        let mut windows = cfg
            .windows
            .iter()
            .map(|w| parse_window(w))
            .collect::<Result<Vec<_>>>()?;
        if windows.is_empty() {
            return Err(ArenaError::Validation(
                "trading_window.windows must not be empty".to_string(),
            ));
        }
        windows.sort();
        Ok(Self {
            offset,
            weekdays,
            windows,
        })
    }

    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_time(now).date_naive()
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        self.weekdays.contains(&self.local_time(now).weekday())
    }

    /// Index of the window containing `now` (start inclusive, end exclusive)
    pub fn window_index(&self, now: DateTime<Utc>) -> Option<usize> {
        let t = self.local_time(now).time();
        self.windows
            .iter()
            .position(|(start, end)| *start <= t && t < *end)
    }

    /// Idempotence key for `now`: local date plus window index
    pub fn slot_key(&self, now: DateTime<Utc>) -> String {
        let date = self.local_date(now);
        match self.window_index(now) {
            Some(idx) if self.is_trading_day(now) => format!("{date}#{idx}"),
            _ => format!("{date}#forced"),
        }
    }

    /// Decide whether a session may run at `now`.
    ///
    /// `force` bypasses only the trading-window check, weekday included.
    pub fn gate(
        &self,
        competition: &CompetitionConfig,
        now: DateTime<Utc>,
        force: bool,
    ) -> GateOutcome {
        let date = self.local_date(now);
        let closed = |reason| GateOutcome::Closed { reason };

        if !competition.active {
            return closed(GateReason::CompetitionInactive);
        }
        if date < competition.start_date {
            return closed(GateReason::BeforeStart);
        }
        if date > competition.end_date {
            return closed(GateReason::AfterEnd);
        }
        if !force {
            if !self.is_trading_day(now) {
                return closed(GateReason::NonTradingDay);
            }
            if self.window_index(now).is_none() {
                return closed(GateReason::OutsideTradingWindow);
            }
        }

        GateOutcome::Open {
            slot: self.slot_key(now),
            forced: force,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn calendar() -> TradingCalendar {
        TradingCalendar::from_config(&TradingWindowConfig {
            utc_offset_minutes: 8 * 60,
            weekdays: vec![1, 2, 3, 4, 5],
            windows: vec!["13:00-15:00".into(), "09:30-11:30".into()],
        })
        .unwrap()
    }

    fn competition() -> CompetitionConfig {
        CompetitionConfig {
            name: "t".into(),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
            fee_rate: dec!(0.0015),
            min_trade_value: dec!(100),
            max_position_pct: dec!(0.3),
            active: true,
        }
    }

    #[test]
    fn test_open_inside_morning_window() {
        // Friday 2026-10-16 10:00 at UTC+8
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap();
        let gate = calendar().gate(&competition(), now, false);
        assert_eq!(
            gate,
            GateOutcome::Open {
                slot: "2026-10-16#0".into(),
                forced: false
            }
        );
    }

    #[test]
    fn test_afternoon_window_has_second_slot() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 5, 30, 0).unwrap(); // 13:30 local
        assert_eq!(calendar().slot_key(now), "2026-10-16#1");
    }

    #[test]
    fn test_lunch_break_is_closed_unless_forced() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 4, 0, 0).unwrap(); // 12:00 local
        let cal = calendar();
        assert_eq!(
            cal.gate(&competition(), now, false),
            GateOutcome::Closed {
                reason: GateReason::OutsideTradingWindow
            }
        );
        assert!(cal.gate(&competition(), now, true).is_open());
    }

    #[test]
    fn test_weekend_is_closed_unless_forced() {
        let now = Utc.with_ymd_and_hms(2026, 10, 17, 2, 0, 0).unwrap(); // Saturday
        let cal = calendar();
        assert_eq!(
            cal.gate(&competition(), now, false),
            GateOutcome::Closed {
                reason: GateReason::NonTradingDay
            }
        );
        assert!(cal.gate(&competition(), now, true).is_open());
    }

    #[test]
    fn test_force_does_not_bypass_dates() {
        let now = Utc.with_ymd_and_hms(2026, 11, 2, 2, 0, 0).unwrap();
        assert_eq!(
            calendar().gate(&competition(), now, true),
            GateOutcome::Closed {
                reason: GateReason::AfterEnd
            }
        );
        let mut inactive = competition();
        inactive.active = false;
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 2, 0, 0).unwrap();
        assert_eq!(
            calendar().gate(&inactive, now, true),
            GateOutcome::Closed {
                reason: GateReason::CompetitionInactive
            }
        );
    }

    #[test]
    fn test_local_date_uses_offset() {
        // 23:00 UTC on the 15th is already the 16th at UTC+8
        let now = Utc.with_ymd_and_hms(2026, 10, 15, 23, 0, 0).unwrap();
        assert_eq!(
            calendar().local_date(now),
            NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_window() {
        let cfg = TradingWindowConfig {
            windows: vec!["15:00-09:00".into()],
            ..TradingWindowConfig::default()
        };
        assert!(TradingCalendar::from_config(&cfg).is_err());
    }
}
