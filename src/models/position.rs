//! Positions: live exchange state and the protective orders we track for it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::SignalSide;

/// Position as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    pub symbol: String,

    /// Signed size, negative for shorts
    pub position_amt: Decimal,

    pub entry_price: Decimal,
}

impl PositionInfo {
    /// Check if this position is open (non-zero size).
    pub fn is_open(&self) -> bool {
        !self.position_amt.is_zero()
    }
}

/// A position opened by the relay together with its protective orders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub symbol: String,

    /// Exchange id of the take-profit-market order
    pub take_profit_order_id: i64,

    /// Exchange id of the stop-market order
    pub stop_loss_order_id: i64,

    pub side: SignalSide,

    /// Quantity sent with the entry order
    pub quantity: Decimal,

    pub opened_at: DateTime<Utc>,
}
