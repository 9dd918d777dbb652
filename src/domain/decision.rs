use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradeSide;

/// Overall market read reported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Bullish => "bullish",
            Sentiment::Bearish => "bearish",
            Sentiment::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Sentiment {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bullish" => Ok(Self::Bullish),
            "bearish" => Ok(Self::Bearish),
            "neutral" => Ok(Self::Neutral),
            other => Err(format!("unknown sentiment '{other}'")),
        }
    }
}

/// Proposed action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionSide {
    Buy,
    Sell,
    Hold,
}

impl ActionSide {
    /// The executable side, or `None` for a hold
    pub fn trade_side(&self) -> Option<TradeSide> {
        match self {
            ActionSide::Buy => Some(TradeSide::Buy),
            ActionSide::Sell => Some(TradeSide::Sell),
            ActionSide::Hold => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionSide::Buy => "buy",
            ActionSide::Sell => "sell",
            ActionSide::Hold => "hold",
        }
    }
}

/// One validated action from a decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub side: ActionSide,
    pub symbol: String,
    pub quantity: Decimal,
    pub target_price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub leverage: Option<Decimal>,
    /// 0..=100
    pub confidence: Option<f64>,
    pub rationale: String,
}

impl ProposedAction {
    pub fn buy(symbol: &str, quantity: Decimal) -> Self {
        Self::new(ActionSide::Buy, symbol, quantity)
    }

    pub fn sell(symbol: &str, quantity: Decimal) -> Self {
        Self::new(ActionSide::Sell, symbol, quantity)
    }

    fn new(side: ActionSide, symbol: &str, quantity: Decimal) -> Self {
        Self {
            side,
            symbol: symbol.to_string(),
            quantity,
            target_price: None,
            stop_loss: None,
            leverage: None,
            confidence: None,
            rationale: String::new(),
        }
    }

    pub fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_stop_loss(mut self, stop: Decimal) -> Self {
        self.stop_loss = Some(stop);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Structurally valid decision produced by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub sentiment: Sentiment,
    pub top_picks: Vec<String>,
    pub avoid_list: Vec<String>,
    pub summary: String,
    pub actions: Vec<ProposedAction>,
}

/// Provider accounting attached to a decision
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallUsage {
    pub tokens: u64,
    pub latency_ms: u64,
    pub attempts: u32,
}

/// How an agent's turn in a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// At least one action executed (or simulated on a dry run)
    Executed,
    /// Valid decision, nothing executed
    NoAction,
    /// Provider or validation failure
    Failed,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Executed => "executed",
            DecisionOutcome::NoAction => "no_action",
            DecisionOutcome::Failed => "failed",
        }
    }
}

impl TryFrom<&str> for DecisionOutcome {
    type Error = String;

    fn try_from(raw: &str) -> std::result::Result<Self, Self::Error> {
        match raw {
            "executed" => Ok(Self::Executed),
            "no_action" => Ok(Self::NoAction),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown decision outcome '{other}'")),
        }
    }
}

/// Audit row written once per agent per session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    /// Session slot key, e.g. `2026-10-16#0`
    pub slot: String,
    pub agent_id: String,
    pub sentiment: Option<Sentiment>,
    pub actions: serde_json::Value,
    pub summary: String,
    pub raw_response: Option<String>,
    pub tokens_used: u64,
    pub latency_ms: u64,
    pub outcome: DecisionOutcome,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}
