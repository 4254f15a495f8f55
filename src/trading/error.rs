//! Typed outcomes of a failed execution step.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::SignalSide;

/// Whether a failure aborts the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Logged; execution continues
    Recoverable,
    /// Execution stops and the caller is told
    Fatal,
}

/// Broad category, used by the webhook to pick a response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad payload; no exchange call was made
    Input,
    /// The exchange rejected a call or did not reach the expected state
    ExchangeState,
    /// A protective order could not be placed
    Protective,
    /// Non-critical step failed
    BestEffort,
}

/// Which protective order failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveKind {
    TakeProfit,
    StopLoss,
}

impl fmt::Display for ProtectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectiveKind::TakeProfit => f.write_str("take-profit"),
            ProtectiveKind::StopLoss => f.write_str("stop-loss"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("Invalid signal format. Required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Invalid TP/SL for {side} at current price {price}: {}", .violations.join("; "))]
    InvalidLevels {
        side: SignalSide,
        price: Decimal,
        violations: Vec<String>,
    },

    #[error("Symbol {0} not found")]
    SymbolNotFound(String),

    #[error("Failed to {step} for {symbol}: {error:#}")]
    Exchange {
        step: &'static str,
        symbol: String,
        error: anyhow::Error,
    },

    #[error("Failed to close existing position on {symbol}")]
    PositionNotClosed { symbol: String },

    #[error("Position on {symbol} was not opened successfully")]
    PositionNotOpened { symbol: String },

    #[error("Error placing {kind} order for {symbol}: {error:#}")]
    ProtectiveOrder {
        kind: ProtectiveKind,
        symbol: String,
        error: anyhow::Error,
    },

    #[error("Could not {step} for {symbol}: {error:#}")]
    BestEffort {
        step: &'static str,
        symbol: String,
        error: anyhow::Error,
    },
}

impl TradeError {
    pub fn exchange(step: &'static str, symbol: &str, error: anyhow::Error) -> Self {
        TradeError::Exchange {
            step,
            symbol: symbol.to_string(),
            error,
        }
    }

    pub fn best_effort(step: &'static str, symbol: &str, error: anyhow::Error) -> Self {
        TradeError::BestEffort {
            step,
            symbol: symbol.to_string(),
            error,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TradeError::BestEffort { .. } => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            TradeError::MissingFields(_)
            | TradeError::InvalidSignal(_)
            | TradeError::InvalidLevels { .. } => ErrorClass::Input,
            TradeError::SymbolNotFound(_)
            | TradeError::Exchange { .. }
            | TradeError::PositionNotClosed { .. }
            | TradeError::PositionNotOpened { .. } => ErrorClass::ExchangeState,
            TradeError::ProtectiveOrder { .. } => ErrorClass::Protective,
            TradeError::BestEffort { .. } => ErrorClass::BestEffort,
        }
    }
}
