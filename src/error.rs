use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the competition engine
#[derive(Error, Debug)]
pub enum ArenaError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Ledger errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Version conflict on {entity} {id}: expected {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },

    #[error("Ledger invariant violated: {0}")]
    LedgerInvariant(String),

    // Market data errors
    #[error("Quote unavailable for symbol: {0}")]
    QuoteUnavailable(String),

    // Decision provider errors
    #[error("Decision provider error: {0}")]
    Provider(#[from] ProviderError),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for ArenaError
pub type Result<T> = std::result::Result<T, ArenaError>;

impl ArenaError {
    /// Optimistic-concurrency conflicts are the only ledger errors worth a re-read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ArenaError::VersionConflict { .. })
    }
}

/// Failures of a remote decision provider call.
///
/// Every variant is a value the orchestrator records against one agent;
/// none of them abort a session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid decision: {0}")]
    Invalid(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout { .. } => true,
            ProviderError::Status { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transport(_) => "transport",
            ProviderError::Timeout { .. } => "timeout",
            ProviderError::Status { .. } => "status",
            ProviderError::Malformed(_) => "malformed",
            ProviderError::Invalid(_) => "invalid",
            ProviderError::NotConfigured(_) => "not_configured",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { elapsed_ms: 0 }
        } else if let Some(status) = err.status() {
            ProviderError::Status {
                code: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// Why a proposed trade was not executed.
///
/// Rejections are expected outcomes, not errors: the executor returns one and
/// leaves the ledger untouched.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("hold actions are not executable")]
    HoldNotExecutable,

    #[error("invalid quantity: {quantity}")]
    InvalidQuantity { quantity: String },

    #[error("invalid price: {price}")]
    InvalidPrice { price: Decimal },

    #[error("notional {notional} below minimum {minimum}")]
    BelowMinimumNotional { notional: Decimal, minimum: Decimal },

    #[error("position would be {projected_pct:.2}% of portfolio, cap {cap_pct:.2}%")]
    ExceedsPositionCap { projected_pct: f64, cap_pct: f64 },

    #[error("insufficient capital: required {required}, available {available}")]
    InsufficientCapital { required: Decimal, available: Decimal },

    #[error("insufficient shares: requested {requested}, held {held}")]
    InsufficientShares { requested: Decimal, held: Decimal },

    #[error("mode violation ({mode}): {detail}")]
    ModeViolation { mode: String, detail: String },
}

impl RejectReason {
    /// Stable machine-readable code used in reports and decision records.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::HoldNotExecutable => "hold_not_executable",
            RejectReason::InvalidQuantity { .. } => "invalid_quantity",
            RejectReason::InvalidPrice { .. } => "invalid_price",
            RejectReason::BelowMinimumNotional { .. } => "below_minimum_notional",
            RejectReason::ExceedsPositionCap { .. } => "exceeds_position_cap",
            RejectReason::InsufficientCapital { .. } => "insufficient_capital",
            RejectReason::InsufficientShares { .. } => "insufficient_shares",
            RejectReason::ModeViolation { .. } => "mode_violation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn transient_provider_errors() {
        assert!(ProviderError::Timeout { elapsed_ms: 10 }.is_transient());
        assert!(ProviderError::Status { code: 503, body: String::new() }.is_transient());
        assert!(ProviderError::Status { code: 429, body: String::new() }.is_transient());
        assert!(!ProviderError::Status { code: 401, body: String::new() }.is_transient());
        assert!(!ProviderError::Invalid("x".into()).is_transient());
    }

    #[test]
    fn reject_reason_codes_are_stable() {
        let reason = RejectReason::InsufficientShares {
            requested: dec!(10),
            held: dec!(5),
        };
        assert_eq!(reason.code(), "insufficient_shares");
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["reason"], "insufficient_shares");
    }
}
