//! Candidate screening, context brief and system prompt
//!
//! Everything here is pure: inputs in, text out. Missing data only drops the
//! corresponding field or score component.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt::Write as _;
use std::path::Path;

use super::rules::ModeRules;
use crate::agent::DECISION_SCHEMA;
use crate::domain::{
    portfolio_value, Agent, CompetitionConfig, CompetitionMode, Fundamentals, Position, Quote,
    TradeRecord,
};
use crate::error::Result;
use crate::metrics::LeaderboardEntry;

/// Everything known about one candidate instrument
#[derive(Debug, Clone, Default, Serialize)]
pub struct CandidateInput {
    pub symbol: String,
    pub name: Option<String>,
    pub price: Option<Decimal>,
    pub previous_close: Option<Decimal>,
    pub yoy_change_pct: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub volume: Option<f64>,
    pub avg_volume: Option<f64>,
    pub week52_high: Option<f64>,
    pub week52_low: Option<f64>,
}

impl CandidateInput {
    pub fn from_parts(symbol: &str, fundamentals: Option<&Fundamentals>, quote: Option<&Quote>) -> Self {
        Self {
            symbol: symbol.to_string(),
            name: fundamentals.and_then(|f| f.name.clone()),
            price: quote.map(|q| q.price),
            previous_close: quote.and_then(|q| q.previous_close),
            yoy_change_pct: fundamentals.and_then(|f| f.yoy_change_pct),
            pe_ratio: fundamentals.and_then(|f| f.pe_ratio),
            volume: quote.and_then(|q| q.volume).and_then(|v| v.to_f64()),
            avg_volume: fundamentals.and_then(|f| f.avg_volume),
            week52_high: fundamentals.and_then(|f| f.week52_high),
            week52_low: fundamentals.and_then(|f| f.week52_low),
        }
    }

    fn price_f64(&self) -> Option<f64> {
        self.price.and_then(|p| p.to_f64())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredCandidate {
    pub input: CandidateInput,
    /// 0..=100
    pub score: f64,
    pub tags: Vec<&'static str>,
}

/// (points, max points, tag)
type Component = (f64, f64, &'static str);

fn yoy_component(yoy: f64) -> Component {
    if yoy > 30.0 {
        (20.0, 20.0, "strong_gain")
    } else if yoy > 10.0 {
        (15.0, 20.0, "moderate_gain")
    } else if yoy >= -10.0 {
        (8.0, 20.0, "flat")
    } else if yoy >= -30.0 {
        (4.0, 20.0, "moderate_loss")
    } else {
        (0.0, 20.0, "heavy_loss")
    }
}

fn valuation_component(pe: f64) -> Component {
    if pe > 0.0 && pe <= 15.0 {
        (25.0, 25.0, "value")
    } else if pe > 0.0 && pe <= 25.0 {
        (18.0, 25.0, "fair_value")
    } else if pe > 0.0 && pe <= 40.0 {
        (10.0, 25.0, "growth")
    } else {
        (3.0, 25.0, "speculative")
    }
}

fn volume_component(ratio: f64) -> Component {
    if ratio >= 2.0 {
        (20.0, 20.0, "volume_surge")
    } else if ratio >= 1.2 {
        (14.0, 20.0, "active")
    } else if ratio >= 0.8 {
        (8.0, 20.0, "normal_volume")
    } else {
        (3.0, 20.0, "quiet")
    }
}

fn range_component(price: f64, low: f64, high: f64) -> Component {
    if price <= low * 1.05 {
        (20.0, 20.0, "near_support")
    } else if price >= high * 0.95 {
        (5.0, 20.0, "near_resistance")
    } else {
        // 12 just above support, falling to 5 just below resistance
        let position = ((price - low) / (high - low)).clamp(0.0, 1.0);
        (5.0 + 7.0 * (1.0 - position), 20.0, "mid_range")
    }
}

/// Score a candidate over whatever data it has
pub fn score_candidate(input: CandidateInput) -> ScoredCandidate {
    let mut parts: Vec<Component> = Vec::with_capacity(4);

    if let Some(yoy) = input.yoy_change_pct.filter(|v| v.is_finite()) {
        parts.push(yoy_component(yoy));
    }
    if let Some(pe) = input.pe_ratio.filter(|v| v.is_finite()) {
        parts.push(valuation_component(pe));
    }
    if let (Some(vol), Some(avg)) = (input.volume, input.avg_volume) {
        if avg > 0.0 && vol.is_finite() {
            parts.push(volume_component(vol / avg));
        }
    }
    if let (Some(price), Some(low), Some(high)) =
        (input.price_f64(), input.week52_low, input.week52_high)
    {
        if low > 0.0 && high > low {
            parts.push(range_component(price, low, high));
        }
    }

    let max: f64 = parts.iter().map(|p| p.1).sum();
    let score = if max > 0.0 {
        parts.iter().map(|p| p.0).sum::<f64>() / max * 100.0
    } else {
        0.0
    };

    ScoredCandidate {
        input,
        score,
        tags: parts.iter().map(|p| p.2).collect(),
    }
}

/// Score all candidates and keep the best `top_k`, ties broken by symbol
pub fn rank_candidates(inputs: Vec<CandidateInput>, top_k: usize) -> Vec<ScoredCandidate> {
    let mut scored: Vec<_> = inputs.into_iter().map(score_candidate).collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.input.symbol.cmp(&b.input.symbol))
    });
    scored.truncate(top_k);
    scored
}

/// Read candidate fundamentals from a JSON array file
pub fn load_fundamentals(path: impl AsRef<Path>) -> Result<Vec<Fundamentals>> {
    let raw = std::fs::read_to_string(path)?;
    let mut list: Vec<Fundamentals> = serde_json::from_str(&raw)?;
    for f in &mut list {
        f.symbol = f.symbol.trim().to_ascii_uppercase();
    }
    Ok(list)
}

/// Inputs for one agent's brief
pub struct BriefInput<'a> {
    pub agent: &'a Agent,
    pub positions: &'a [Position],
    /// Most recent first
    pub recent_trades: &'a [TradeRecord],
    pub candidates: &'a [ScoredCandidate],
    /// Only shown in `see_competitors` mode
    pub leaderboard: Option<&'a [LeaderboardEntry]>,
    pub local_date: chrono::NaiveDate,
}

fn money(d: Decimal) -> String {
    format!("{:.2}", d.round_dp(2))
}

/// Keep whole lines while they fit in `max_chars`
fn bound_to_lines(text: String, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut out = String::with_capacity(max_chars);
    let mut used = 0;
    for line in text.lines() {
        let len = line.chars().count() + 1;
        if used + len > max_chars {
            break;
        }
        out.push_str(line);
        out.push('\n');
        used += len;
    }
    out
}

/// Render the context brief for one agent, bounded to `max_chars`
pub fn build_brief(input: &BriefInput<'_>, max_chars: usize) -> String {
    let agent = input.agent;
    let value = portfolio_value(agent.cash, input.positions);
    let mut s = String::new();

    let _ = writeln!(s, "DATE: {}", input.local_date);
    let _ = writeln!(s, "\nACCOUNT");
    let _ = writeln!(s, "- starting capital: {}", money(agent.starting_capital));
    let _ = writeln!(s, "- cash: {}", money(agent.cash));
    let _ = writeln!(s, "- portfolio value: {}", money(value));
    if !agent.starting_capital.is_zero() {
        let ret = (value / agent.starting_capital - Decimal::ONE) * Decimal::ONE_HUNDRED;
        let _ = writeln!(s, "- total return: {}%", money(ret));
    }
    let _ = writeln!(s, "- realized P&L: {}", money(agent.realized_pnl));
    let _ = writeln!(
        s,
        "- trades: {} ({} winning)",
        agent.total_trades, agent.winning_trades
    );

    let _ = writeln!(s, "\nPOSITIONS");
    if input.positions.is_empty() {
        let _ = writeln!(s, "- none");
    }
    for p in input.positions {
        let _ = writeln!(
            s,
            "- {}: {} @ avg {} | last {} | unrealized {}",
            p.symbol,
            p.quantity.normalize(),
            money(p.avg_price),
            money(p.current_price),
            money(p.unrealized_pnl())
        );
    }

    if !input.recent_trades.is_empty() {
        let _ = writeln!(s, "\nRECENT TRADES");
        for t in input.recent_trades {
            let _ = write!(
                s,
                "- {} {} {} {} @ {}",
                t.executed_at.format("%Y-%m-%d %H:%M"),
                t.side,
                t.quantity.normalize(),
                t.symbol,
                money(t.price)
            );
            if let Some(pnl) = t.realized_pnl {
                let _ = write!(s, " (P&L {})", money(pnl));
            }
            let _ = writeln!(s);
        }
    }

    if let Some(board) = input.leaderboard {
        let _ = writeln!(s, "\nLEADERBOARD");
        for e in board {
            let marker = if e.agent_id == agent.id { " (you)" } else { "" };
            let _ = writeln!(
                s,
                "{}. {}{}: {} ({:+.2}%)",
                e.rank,
                e.name,
                marker,
                money(e.portfolio_value),
                e.total_return_pct
            );
        }
    }

    let _ = writeln!(s, "\nCANDIDATES (score 0-100)");
    if input.candidates.is_empty() {
        let _ = writeln!(s, "- no candidates with market data");
    }
    for c in input.candidates {
        let i = &c.input;
        let _ = write!(s, "- {} [{:.0}]", i.symbol, c.score);
        if let Some(name) = &i.name {
            let _ = write!(s, " {name}");
        }
        if let Some(price) = i.price {
            let _ = write!(s, " | price {}", money(price));
        }
        if let (Some(price), Some(prev)) = (i.price, i.previous_close) {
            if !prev.is_zero() {
                let chg = (price / prev - Decimal::ONE) * Decimal::ONE_HUNDRED;
                let _ = write!(s, " ({}% today)", money(chg));
            }
        }
        if let Some(yoy) = i.yoy_change_pct {
            let _ = write!(s, " | YoY {yoy:+.1}%");
        }
        if let Some(pe) = i.pe_ratio {
            let _ = write!(s, " | P/E {pe:.1}");
        }
        if let (Some(low), Some(high)) = (i.week52_low, i.week52_high) {
            let _ = write!(s, " | 52w {low:.2}-{high:.2}");
        }
        if !c.tags.is_empty() {
            let _ = write!(s, " | {}", c.tags.join(", "));
        }
        let _ = writeln!(s);
    }

    bound_to_lines(s, max_chars)
}

/// Instructions for one agent: rules of the game and the output schema
pub fn system_prompt(agent: &Agent, competition: &CompetitionConfig, rules: &ModeRules) -> String {
    let fee_pct = (competition.fee_rate * Decimal::ONE_HUNDRED).normalize();
    let cap_pct = (competition.max_position_pct * Decimal::ONE_HUNDRED).normalize();
    let competitors = if agent.mode == CompetitionMode::SeeCompetitors {
        "\nYou can see the other competitors' standings; use them as you see fit."
    } else {
        ""
    };

    format!(
        r#"You are {name}, an autonomous stock trader competing in "{competition}".
Your goal is to maximize portfolio value by the end of the competition on {end}.

RULES
- Long positions only; sell only shares you hold.
- Fee: {fee_pct}% of notional on every buy and sell.
- Minimum trade value: {min}.
- No single position may exceed {cap_pct}% of your portfolio value.
- {mode_rules}{competitors}

Respond with a single JSON object and nothing else, following this schema:
{schema}

Use "hold" or an empty actions list when nothing is worth doing."#,
        name = agent.name,
        competition = competition.name,
        end = competition.end_date,
        min = money(competition.min_trade_value),
        mode_rules = rules.describe(agent.mode),
        schema = DECISION_SCHEMA,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderKind;
    use rust_decimal_macros::dec;

    fn candidate(symbol: &str) -> CandidateInput {
        CandidateInput {
            symbol: symbol.to_string(),
            ..CandidateInput::default()
        }
    }

    #[test]
    fn test_full_data_scores_all_components() {
        let c = CandidateInput {
            price: Some(dec!(51)),
            yoy_change_pct: Some(35.0),
            pe_ratio: Some(12.0),
            volume: Some(3_000_000.0),
            avg_volume: Some(1_000_000.0),
            week52_low: Some(50.0),
            week52_high: Some(100.0),
            ..candidate("A")
        };
        let s = score_candidate(c);
        assert_eq!(s.score, 100.0);
        assert_eq!(s.tags, vec!["strong_gain", "value", "volume_surge", "near_support"]);
    }

    #[test]
    fn test_missing_data_is_normalized_over_available_parts() {
        // Only P/E known: 18 of 25
        let s = score_candidate(CandidateInput {
            pe_ratio: Some(20.0),
            ..candidate("B")
        });
        assert!((s.score - 72.0).abs() < 1e-9);
        assert_eq!(score_candidate(candidate("C")).score, 0.0);
    }

    #[test]
    fn test_negative_pe_is_speculative() {
        let s = score_candidate(CandidateInput {
            pe_ratio: Some(-4.0),
            ..candidate("D")
        });
        assert_eq!(s.tags, vec!["speculative"]);
    }

    #[test]
    fn test_rank_ties_by_symbol_and_truncates() {
        let ranked = rank_candidates(vec![candidate("Z"), candidate("A"), candidate("M")], 2);
        let symbols: Vec<_> = ranked.iter().map(|c| c.input.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "M"]);
    }

    #[test]
    fn test_brief_is_bounded_on_line_boundary() {
        let agent = Agent::new("a", "Alpha", ProviderKind::Scripted, "m", dec!(10000), CompetitionMode::Baseline);
        let candidates: Vec<_> = (0..200)
            .map(|i| score_candidate(CandidateInput {
                pe_ratio: Some(10.0),
                ..candidate(&format!("SYM{i:03}"))
            }))
            .collect();
        let input = BriefInput {
            agent: &agent,
            positions: &[],
            recent_trades: &[],
            candidates: &candidates,
            leaderboard: None,
            local_date: chrono::NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        };
        let brief = build_brief(&input, 1000);
        assert!(brief.len() <= 1000);
        assert!(brief.ends_with('\n'));
        assert!(brief.contains("cash: 10000.00"));
        assert!(!brief.contains("LEADERBOARD"));
    }

    #[test]
    fn test_system_prompt_mentions_mode_rules() {
        let agent = Agent::new("a", "Alpha", ProviderKind::Scripted, "m", dec!(10000), CompetitionMode::LeverageRequired);
        let competition = CompetitionConfig {
            name: "Fall Cup".into(),
            start_date: chrono::NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
            end_date: chrono::NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
            fee_rate: dec!(0.0015),
            min_trade_value: dec!(100),
            max_position_pct: dec!(0.30),
            active: true,
        };
        let prompt = system_prompt(&agent, &competition, &ModeRules::default());
        assert!(prompt.contains("Fee: 0.15%"));
        assert!(prompt.contains("30%"));
        assert!(prompt.contains("leverage between 1 and 3"));
        assert!(prompt.contains("\"sentiment\""));
    }
}
