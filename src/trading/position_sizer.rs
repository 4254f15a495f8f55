//! Position sizing: margin budget x leverage / price, fitted to exchange limits.

use anyhow::{bail, Result};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::SymbolFilters;
use super::rounding::{decimal_precision, round_to_step};
use super::{SizingPolicy, TradingConfig};

/// Result of a sizing calculation, kept for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedPosition {
    /// USDT margin committed
    pub notional: Decimal,

    /// Quantity before exchange limits were applied
    pub raw_quantity: Decimal,

    /// Exchange-acceptable quantity
    pub quantity: Decimal,
}

/// Calculator for order quantities.
pub struct PositionSizer {
    policy: SizingPolicy,
    leverage: Decimal,
}

impl PositionSizer {
    /// Create a new position sizer with given config.
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            policy: config.sizing.clone(),
            leverage: Decimal::from(config.leverage),
        }
    }

    /// USDT margin to commit for a given wallet balance.
    pub fn notional(&self, balance: Decimal) -> Decimal {
        match &self.policy {
            SizingPolicy::FixedNotional { usdt } => {
                if balance < *usdt {
                    balance
                } else {
                    *usdt
                }
            }
            SizingPolicy::BalanceFraction { fraction } => balance * fraction,
        }
    }

    /// Calculate the order quantity for a new position.
    ///
    /// The quantity is clamped to the symbol's `[min_qty, max_qty]` range and
    /// snapped to its step size. Whether the account can actually margin the
    /// result after fees is not checked.
    pub fn size(
        &self,
        balance: Decimal,
        price: Decimal,
        filters: &SymbolFilters,
    ) -> Result<SizedPosition> {
        if price <= Decimal::ZERO {
            bail!("cannot size a position at non-positive price {}", price);
        }

        let notional = self.notional(balance);
        let raw_quantity = notional * self.leverage / price;

        let clamped = filters.clamp_quantity(raw_quantity);
        let stepped = round_to_step(clamped, filters.step_size)?;

        // Guard against residual digits from the division
        let quantity = stepped.round_dp_with_strategy(
            decimal_precision(filters.step_size),
            RoundingStrategy::MidpointAwayFromZero,
        );

        Ok(SizedPosition {
            notional,
            raw_quantity,
            quantity,
        })
    }
}
