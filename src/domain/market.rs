use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Last known price for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub previous_close: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub as_of: DateTime<Utc>,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            previous_close: None,
            volume: None,
            as_of: Utc::now(),
        }
    }

    /// Change versus previous close in percent
    pub fn change_pct(&self) -> Option<Decimal> {
        let prev = self.previous_close?;
        if prev.is_zero() {
            return None;
        }
        Some((self.price - prev) / prev * Decimal::from(100))
    }
}

/// Longest ticker accepted from providers or config
pub const MAX_SYMBOL_LEN: usize = 15;

/// Ticker charset: letters, digits and `.-^=` (BRK.B, ^GSPC, EURUSD=X)
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='))
}

/// Fundamentals for one screening candidate; every field but the symbol is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fundamentals {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    /// Year-over-year price change in percent
    #[serde(default)]
    pub yoy_change_pct: Option<f64>,
    #[serde(default)]
    pub pe_ratio: Option<f64>,
    #[serde(default)]
    pub avg_volume: Option<f64>,
    #[serde(default)]
    pub week52_high: Option<f64>,
    #[serde(default)]
    pub week52_low: Option<f64>,
}
