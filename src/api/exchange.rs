//! Exchange operations needed to execute a signal.

use std::future::Future;

use anyhow::Result;
use rust_decimal::Decimal;

use crate::models::{OrderSide, PositionInfo, SymbolFilters};

/// Order type and its type-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderKind {
    /// Market order for a fixed quantity
    Market { quantity: Decimal, reduce_only: bool },
    /// Closes the whole position when mark price reaches `stop_price` (profit side)
    TakeProfitMarket { stop_price: Decimal },
    /// Closes the whole position when mark price reaches `stop_price` (loss side)
    StopMarket { stop_price: Decimal },
}

/// Order to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,

    /// Client-generated id; the exchange rejects a second order with the same id
    pub client_order_id: String,
}

impl OrderRequest {
    fn new(symbol: &str, side: OrderSide, kind: OrderKind) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            kind,
            client_order_id: format!("sr-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    /// Market order opening or adding to a position.
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::Market { quantity, reduce_only: false })
    }

    /// Market order that may only shrink the current position.
    pub fn close(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::Market { quantity, reduce_only: true })
    }

    pub fn take_profit(symbol: &str, side: OrderSide, stop_price: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::TakeProfitMarket { stop_price })
    }

    pub fn stop_loss(symbol: &str, side: OrderSide, stop_price: Decimal) -> Self {
        Self::new(symbol, side, OrderKind::StopMarket { stop_price })
    }

    /// Exchange order type name.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            OrderKind::Market { .. } => "MARKET",
            OrderKind::TakeProfitMarket { .. } => "TAKE_PROFIT_MARKET",
            OrderKind::StopMarket { .. } => "STOP_MARKET",
        }
    }
}

/// Exchange acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    pub order_id: i64,
    pub client_order_id: String,
    pub status: String,
}

/// Futures account operations used by the executor and the position monitor.
pub trait Exchange: Send + Sync + 'static {
    /// Last traded price for a symbol.
    fn ticker_price(&self, symbol: &str) -> impl Future<Output = Result<Decimal>> + Send;

    /// USDT wallet balance.
    fn usdt_balance(&self) -> impl Future<Output = Result<Decimal>> + Send;

    /// Trading rules for a symbol, `None` if the exchange does not list it.
    fn symbol_filters(
        &self,
        symbol: &str,
    ) -> impl Future<Output = Result<Option<SymbolFilters>>> + Send;

    fn set_leverage(&self, symbol: &str, leverage: u32) -> impl Future<Output = Result<()>> + Send;

    fn cancel_all_open_orders(&self, symbol: &str) -> impl Future<Output = Result<()>> + Send;

    fn cancel_order(&self, symbol: &str, order_id: i64) -> impl Future<Output = Result<()>> + Send;

    fn open_order_count(&self, symbol: &str) -> impl Future<Output = Result<usize>> + Send;

    fn place_order(&self, order: &OrderRequest) -> impl Future<Output = Result<OrderAck>> + Send;

    /// Position entries for a symbol (one-way mode reports a single entry, possibly zero).
    fn positions(&self, symbol: &str) -> impl Future<Output = Result<Vec<PositionInfo>>> + Send;
}
