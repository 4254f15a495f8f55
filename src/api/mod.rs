//! Binance USDT-M Futures client and the exchange seam used by the executor.

mod binance_client;
mod exchange;
#[cfg(test)]
pub mod mock;
mod types;
pub mod user_stream;

pub use binance_client::{BinanceClient, Network};
pub use exchange::{Exchange, OrderAck, OrderKind, OrderRequest};
