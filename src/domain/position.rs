use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An agent's holding in one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub agent_id: String,
    pub symbol: String,
    /// Always > 0; a flat position is deleted
    pub quantity: Decimal,
    /// Weighted-average entry price
    pub avg_price: Decimal,
    /// Last price seen by the engine
    pub current_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Position {
    pub fn open(agent_id: &str, symbol: &str, quantity: Decimal, price: Decimal) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            quantity,
            avg_price: price,
            current_price: price,
            opened_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn market_value(&self) -> Decimal {
        self.quantity * self.current_price
    }

    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.avg_price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.current_price - self.avg_price) * self.quantity
    }

    /// Position after adding `quantity` at `price`.
    ///
    /// avg = (old_qty * old_avg + qty * price) / (old_qty + qty)
    pub fn merged_with(&self, quantity: Decimal, price: Decimal) -> Position {
        let new_qty = self.quantity + quantity;
        let avg_price = if new_qty.is_zero() {
            price
        } else {
            (self.quantity * self.avg_price + quantity * price) / new_qty
        };
        Position {
            quantity: new_qty,
            avg_price,
            current_price: price,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Position after removing `quantity`, or `None` when it goes flat.
    /// Entry price is unchanged on a reduction.
    pub fn reduced_by(&self, quantity: Decimal, price: Decimal) -> Option<Position> {
        let remaining = self.quantity - quantity;
        if remaining <= Decimal::ZERO {
            return None;
        }
        Some(Position {
            quantity: remaining,
            current_price: price,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }
}

/// Cash plus marked-to-market holdings
pub fn portfolio_value(cash: Decimal, positions: &[Position]) -> Decimal {
    cash + positions.iter().map(Position::market_value).sum::<Decimal>()
}
