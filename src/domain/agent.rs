use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Lifecycle status of a competitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Paused,
    Disqualified,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Paused => "paused",
            AgentStatus::Disqualified => "disqualified",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "disqualified" => Ok(Self::Disqualified),
            other => Err(format!("unknown agent status '{other}'")),
        }
    }
}

/// Named rule bundle an agent competes under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionMode {
    /// Standard rules only
    Baseline,
    /// Tighter position cap, stop-loss required on entries
    CapitalPreservation,
    /// Every trade must declare a leverage multiplier within range
    LeverageRequired,
    /// Standard rules, but the brief includes the current leaderboard
    SeeCompetitors,
}

impl Default for CompetitionMode {
    fn default() -> Self {
        Self::Baseline
    }
}

impl CompetitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompetitionMode::Baseline => "baseline",
            CompetitionMode::CapitalPreservation => "capital_preservation",
            CompetitionMode::LeverageRequired => "leverage_required",
            CompetitionMode::SeeCompetitors => "see_competitors",
        }
    }
}

impl std::fmt::Display for CompetitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CompetitionMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "baseline" => Ok(Self::Baseline),
            "capital_preservation" | "preservation" => Ok(Self::CapitalPreservation),
            "leverage_required" | "leverage" => Ok(Self::LeverageRequired),
            "see_competitors" | "competitive" => Ok(Self::SeeCompetitors),
            other => Err(format!("unknown competition mode '{other}'")),
        }
    }
}

/// Wire protocol family of a decision provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions (OpenAI, DeepSeek, Grok, Qwen, ...)
    #[serde(rename = "openai", alias = "deepseek", alias = "grok", alias = "qwen")]
    OpenAi,
    /// Anthropic messages API
    Anthropic,
    /// Google Gemini generateContent
    Gemini,
    /// In-process fixed responses
    Scripted,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "gemini",
            ProviderKind::Scripted => "scripted",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai_compatible" | "deepseek" | "grok" | "qwen" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "gemini" | "google" => Ok(Self::Gemini),
            "scripted" | "mock" => Ok(Self::Scripted),
            other => Err(format!("unknown provider kind '{other}'")),
        }
    }
}

/// One simulated competitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    pub model: String,
    pub starting_capital: Decimal,
    /// Free capital available for new entries
    pub cash: Decimal,
    pub realized_pnl: Decimal,
    pub total_trades: i64,
    pub winning_trades: i64,
    pub status: AgentStatus,
    pub mode: CompetitionMode,
    pub last_trade_at: Option<DateTime<Utc>>,
    /// Last computed cash + holdings value
    pub portfolio_value: Decimal,
    pub rank: Option<i32>,
    /// Bumped on every committed trade
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: ProviderKind,
        model: impl Into<String>,
        starting_capital: Decimal,
        mode: CompetitionMode,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider,
            model: model.into(),
            starting_capital,
            cash: starting_capital,
            realized_pnl: Decimal::ZERO,
            total_trades: 0,
            winning_trades: 0,
            status: AgentStatus::Active,
            mode,
            last_trade_at: None,
            portfolio_value: starting_capital,
            rank: None,
            version: 0,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }

    /// Return since start in percent
    pub fn total_return_pct(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        if self.starting_capital.is_zero() {
            return 0.0;
        }
        ((self.portfolio_value / self.starting_capital - Decimal::ONE) * Decimal::from(100))
            .to_f64()
            .unwrap_or(0.0)
    }
}
