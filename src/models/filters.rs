//! Exchange trading rules for a symbol.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Price and quantity constraints for one symbol.
///
/// Fetched from exchange metadata for every trade; never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFilters {
    /// Minimum price increment (PRICE_FILTER)
    pub tick_size: Decimal,

    /// Minimum quantity increment (LOT_SIZE)
    pub step_size: Decimal,

    /// Smallest accepted order quantity
    pub min_qty: Decimal,

    /// Largest accepted order quantity
    pub max_qty: Decimal,
}

impl SymbolFilters {
    /// Clamp a quantity into `[min_qty, max_qty]`.
    pub fn clamp_quantity(&self, quantity: Decimal) -> Decimal {
        quantity.max(self.min_qty).min(self.max_qty)
    }
}
