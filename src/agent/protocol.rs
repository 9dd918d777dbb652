//! Decision provider communication protocol definitions
//!
//! Defines what goes to a provider (system prompt + brief) and what comes back
//! before and after validation.

use serde::{Deserialize, Serialize};

use crate::domain::{CallUsage, Decision};
use crate::error::ProviderError;

/// Raw text returned by a provider plus its token accounting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCompletion {
    pub text: String,
    /// Approximate token cost reported by the provider (0 when unknown)
    pub tokens: u64,
}

/// A validated decision together with the call accounting
#[derive(Debug, Clone)]
pub struct AgentDecision {
    pub decision: Decision,
    pub raw: String,
    pub usage: CallUsage,
}

/// A failed decision call; keeps whatever accounting and raw text exist
#[derive(Debug, Clone)]
pub struct DecisionFailure {
    pub error: ProviderError,
    pub raw: Option<String>,
    pub usage: CallUsage,
}

impl std::fmt::Display for DecisionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {} attempt(s)", self.error, self.usage.attempts)
    }
}

/// Output schema every provider is asked to follow
pub const DECISION_SCHEMA: &str = r#"{
  "sentiment": "bullish" | "bearish" | "neutral",
  "top_picks": ["SYMBOL", ...],
  "avoid_list": ["SYMBOL", ...],
  "summary": "one paragraph market view",
  "actions": [
    {
      "action": "buy" | "sell" | "hold",
      "symbol": "SYMBOL",
      "quantity": 100,
      "confidence": 0-100,
      "target_price": 123.45,
      "stop_loss": 110.00,
      "leverage": 1.0,
      "reason": "why"
    }
  ]
}"#;
