//! Data models for signals, symbol rules, and positions.

mod filters;
mod position;
mod signal;

pub use filters::SymbolFilters;
pub use position::{PositionInfo, TrackedPosition};
pub use signal::{OrderSide, SignalSide, TradingSignal};
