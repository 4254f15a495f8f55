//! Take-profit and stop-loss levels for a new position.

use rust_decimal::Decimal;

use crate::models::SignalSide;
use super::TradeError;

/// Trigger prices for the protective orders, before tick rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveLevels {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

/// Check sender-supplied levels against the current price.
///
/// A long needs `tp > price > sl`, a short `tp < price < sl`. Every violated
/// bound is reported.
pub fn validate_levels(
    side: SignalSide,
    price: Decimal,
    take_profit: Decimal,
    stop_loss: Decimal,
) -> Result<ProtectiveLevels, TradeError> {
    let mut violations = Vec::new();

    match side {
        SignalSide::Long => {
            if take_profit <= price {
                violations.push(format!(
                    "take profit {} must be above current price {}",
                    take_profit, price
                ));
            }
            if stop_loss >= price {
                violations.push(format!(
                    "stop loss {} must be below current price {}",
                    stop_loss, price
                ));
            }
        }
        SignalSide::Short => {
            if take_profit >= price {
                violations.push(format!(
                    "take profit {} must be below current price {}",
                    take_profit, price
                ));
            }
            if stop_loss <= price {
                violations.push(format!(
                    "stop loss {} must be above current price {}",
                    stop_loss, price
                ));
            }
        }
    }

    if !violations.is_empty() {
        return Err(TradeError::InvalidLevels {
            side,
            price,
            violations,
        });
    }

    Ok(ProtectiveLevels {
        take_profit,
        stop_loss,
    })
}

/// Derive levels from the current price.
///
/// The stop sits `stop_loss_pct` away from price; the target sits
/// `risk_reward_ratio` stop distances away on the other side.
pub fn compute_levels(
    side: SignalSide,
    price: Decimal,
    stop_loss_pct: Decimal,
    risk_reward_ratio: Decimal,
) -> ProtectiveLevels {
    match side {
        SignalSide::Long => {
            let stop_loss = price * (Decimal::ONE - stop_loss_pct);
            let distance = price - stop_loss;
            ProtectiveLevels {
                take_profit: price + distance * risk_reward_ratio,
                stop_loss,
            }
        }
        SignalSide::Short => {
            let stop_loss = price * (Decimal::ONE + stop_loss_pct);
            let distance = stop_loss - price;
            ProtectiveLevels {
                take_profit: price - distance * risk_reward_ratio,
                stop_loss,
            }
        }
    }
}
