//! Trading logic: rounding, sizing, settlement polling and signal execution.

mod config;
mod error;
mod executor;
mod levels;
mod position_sizer;
pub mod rounding;
mod settle;
mod tracker;

pub use config::{LevelSource, SettleConfig, SizingPolicy, TradingConfig};
pub use error::{ErrorClass, ProtectiveKind, TradeError};
pub use executor::TradeExecutor;
pub use position_sizer::PositionSizer;
pub use settle::SettlePoller;
pub use tracker::PositionTracker;
