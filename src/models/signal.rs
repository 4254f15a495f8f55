//! Trading signal received from the webhook.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction requested by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSide {
    Long,
    Short,
}

impl SignalSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSide::Long => "long",
            SignalSide::Short => "short",
        }
    }

    /// Order side that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            SignalSide::Long => OrderSide::Buy,
            SignalSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }
}

impl FromStr for SignalSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(SignalSide::Long),
            "short" => Ok(SignalSide::Short),
            other => Err(format!("unknown side '{}', expected 'long' or 'short'", other)),
        }
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of an exchange order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Side that flattens a signed position amount (negative = short).
    pub fn closing(position_amt: Decimal) -> OrderSide {
        if position_amt.is_sign_negative() {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// Validated trading signal. Lives for the duration of one webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingSignal {
    pub side: SignalSide,

    /// Exchange symbol, e.g. "BTCUSDT"
    pub symbol: String,

    /// Take-profit trigger price supplied by the sender
    pub take_profit: Option<Decimal>,

    /// Stop-loss trigger price supplied by the sender
    pub stop_loss: Option<Decimal>,
}

impl TradingSignal {
    pub fn new(side: SignalSide, symbol: impl Into<String>) -> Self {
        Self {
            side,
            symbol: symbol.into(),
            take_profit: None,
            stop_loss: None,
        }
    }

    pub fn with_levels(mut self, take_profit: Decimal, stop_loss: Decimal) -> Self {
        self.take_profit = Some(take_profit);
        self.stop_loss = Some(stop_loss);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_parsing() {
        assert_eq!("LONG".parse::<SignalSide>().unwrap(), SignalSide::Long);
        assert_eq!(" short ".parse::<SignalSide>().unwrap(), SignalSide::Short);
        assert!("buy".parse::<SignalSide>().is_err());
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(SignalSide::Long.entry_side(), OrderSide::Buy);
        assert_eq!(SignalSide::Long.exit_side(), OrderSide::Sell);
        assert_eq!(SignalSide::Short.entry_side(), OrderSide::Sell);
        assert_eq!(OrderSide::closing(dec!(-0.5)), OrderSide::Buy);
        assert_eq!(OrderSide::closing(dec!(0.5)), OrderSide::Sell);
    }
}
