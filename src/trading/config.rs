//! Trading configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How much USDT margin a new position commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SizingPolicy {
    /// Fixed USDT margin; the whole balance is used when it is smaller
    FixedNotional { usdt: Decimal },
    /// Fraction of the wallet balance (0.0 to 1.0)
    BalanceFraction { fraction: Decimal },
}

impl fmt::Display for SizingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizingPolicy::FixedNotional { usdt } => write!(f, "fixed {} USDT", usdt),
            SizingPolicy::BalanceFraction { fraction } => {
                write!(f, "{}% of balance", fraction * Decimal::from(100))
            }
        }
    }
}

/// Where take-profit and stop-loss levels come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelSource {
    /// `tp` and `sl` are required in the webhook payload
    Signal,
    /// Derived from the current price, `stop_loss_pct` and `risk_reward_ratio`
    Computed,
}

impl fmt::Display for LevelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSource::Signal => f.write_str("signal"),
            LevelSource::Computed => f.write_str("computed"),
        }
    }
}

/// Poll schedule used while waiting for the exchange to reflect an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleConfig {
    /// First delay between polls (milliseconds)
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay (milliseconds)
    pub max_delay_ms: u64,

    /// Number of state checks before giving up
    pub max_attempts: u32,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 250,
            max_delay_ms: 2000,
            max_attempts: 8,
        }
    }
}

/// Configuration for sizing and executing signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Leverage set on the symbol before entering
    pub leverage: u32,

    /// Margin committed per position
    pub sizing: SizingPolicy,

    /// Source of take-profit / stop-loss levels
    pub level_source: LevelSource,

    /// Reward multiple of the stop distance (computed levels only)
    pub risk_reward_ratio: Decimal,

    /// Stop distance as a fraction of price (computed levels only)
    pub stop_loss_pct: Decimal,

    /// Settlement polling
    pub settle: SettleConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            leverage: 50,
            sizing: SizingPolicy::BalanceFraction { fraction: dec!(0.90) }, // Keep a 10% margin buffer
            level_source: LevelSource::Signal,
            risk_reward_ratio: dec!(1),
            stop_loss_pct: dec!(0.001), // 0.1% stop
            settle: SettleConfig::default(),
        }
    }
}
