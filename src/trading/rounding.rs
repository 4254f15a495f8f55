//! Rounding quantities and prices to exchange increments.
//!
//! Exchanges publish step and tick sizes as powers of ten (`0.001`, `0.10`),
//! so the decimal precision of an increment is the number of decimals left
//! after normalizing it. All arithmetic stays in `Decimal`; binary floats lose
//! digits on increments as small as `1e-8`.

use anyhow::{bail, Result};
use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places implied by an increment (`0.001` -> 3, `0.10` -> 1, `5` -> 0).
pub fn decimal_precision(increment: Decimal) -> u32 {
    increment.normalize().scale()
}

/// Round a quantity to the nearest valid multiple of `step_size`.
pub fn round_to_step(quantity: Decimal, step_size: Decimal) -> Result<Decimal> {
    round_to_increment(quantity, step_size, "step size")
}

/// Round a price to the nearest valid multiple of `tick_size`.
pub fn round_to_tick(price: Decimal, tick_size: Decimal) -> Result<Decimal> {
    round_to_increment(price, tick_size, "tick size")
}

fn round_to_increment(value: Decimal, increment: Decimal, what: &str) -> Result<Decimal> {
    if increment <= Decimal::ZERO {
        bail!("{} must be positive, got {}", what, increment);
    }

    let steps = match value.checked_div(increment) {
        Some(steps) => steps.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        None => bail!("{} is out of range for {} {}", value, what, increment),
    };
    let Some(snapped) = steps.checked_mul(increment) else {
        bail!("{} is out of range for {} {}", value, what, increment);
    };

    Ok(snapped.round_dp_with_strategy(
        decimal_precision(increment),
        RoundingStrategy::MidpointAwayFromZero,
    ))
}
