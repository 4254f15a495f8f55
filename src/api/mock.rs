//! In-memory exchange for tests.
//!
//! Market orders fill instantly against the stored position; conditional
//! orders rest in an open-order list until cancelled.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use rust_decimal::Decimal;

use crate::models::{OrderSide, PositionInfo, SymbolFilters};

use super::exchange::{Exchange, OrderAck, OrderKind, OrderRequest};

#[derive(Debug, Default)]
struct MockState {
    prices: HashMap<String, Decimal>,
    balance: Decimal,
    filters: HashMap<String, SymbolFilters>,
    positions: HashMap<String, Decimal>,
    open_orders: Vec<(String, i64)>,
    placed: Vec<OrderRequest>,
    calls: Vec<String>,
    next_order_id: i64,
    failing_order_types: HashSet<&'static str>,
    fail_leverage: bool,
    fail_cancel: bool,
    fill_market_orders: bool,
}

#[derive(Debug)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_order_id: 1000,
                fill_market_orders: true,
                ..Default::default()
            }),
        }
    }

    /// BTCUSDT at the given price with Binance's real filters and a 1000 USDT wallet.
    pub fn btc_at(price: Decimal) -> Self {
        Self::new()
            .with_price("BTCUSDT", price)
            .with_balance(Decimal::from(1000))
            .with_filters(
                "BTCUSDT",
                SymbolFilters {
                    tick_size: Decimal::new(10, 2),
                    step_size: Decimal::new(1, 3),
                    min_qty: Decimal::new(1, 3),
                    max_qty: Decimal::from(1000),
                },
            )
    }

    fn with_state(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn with_price(self, symbol: &str, price: Decimal) -> Self {
        self.with_state(|s| {
            s.prices.insert(symbol.to_string(), price);
        })
    }

    pub fn with_balance(self, balance: Decimal) -> Self {
        self.with_state(|s| s.balance = balance)
    }

    pub fn with_filters(self, symbol: &str, filters: SymbolFilters) -> Self {
        self.with_state(|s| {
            s.filters.insert(symbol.to_string(), filters);
        })
    }

    pub fn with_position(self, symbol: &str, amount: Decimal) -> Self {
        self.with_state(|s| {
            s.positions.insert(symbol.to_string(), amount);
        })
    }

    pub fn with_open_order(self, symbol: &str) -> Self {
        self.with_state(|s| {
            let id = s.next_order_id;
            s.next_order_id += 1;
            s.open_orders.push((symbol.to_string(), id));
        })
    }

    /// Reject every order of the given type (e.g. "STOP_MARKET").
    pub fn failing_order(self, order_type: &'static str) -> Self {
        self.with_state(|s| {
            s.failing_order_types.insert(order_type);
        })
    }

    pub fn failing_leverage(self) -> Self {
        self.with_state(|s| s.fail_leverage = true)
    }

    pub fn failing_cancel(self) -> Self {
        self.with_state(|s| s.fail_cancel = true)
    }

    /// Accept market orders without changing the position.
    pub fn without_fills(self) -> Self {
        self.with_state(|s| s.fill_market_orders = false)
    }

    /// Simulate the position being closed outside the relay.
    pub fn set_position(&self, symbol: &str, amount: Decimal) {
        self.state.lock().unwrap().positions.insert(symbol.to_string(), amount);
    }

    pub fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn position_amt(&self, symbol: &str) -> Decimal {
        let state = self.state.lock().unwrap();
        state.positions.get(symbol).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn open_order_ids(&self, symbol: &str) -> Vec<i64> {
        let state = self.state.lock().unwrap();
        state
            .open_orders
            .iter()
            .filter(|(s, _)| s == symbol)
            .map(|(_, id)| *id)
            .collect()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, MockState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

impl Exchange for MockExchange {
    async fn ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let state = self.record(format!("ticker_price {}", symbol));
        state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow!("Binance API error -1121: Invalid symbol."))
    }

    async fn usdt_balance(&self) -> Result<Decimal> {
        let state = self.record("usdt_balance".to_string());
        Ok(state.balance)
    }

    async fn symbol_filters(&self, symbol: &str) -> Result<Option<SymbolFilters>> {
        let state = self.record(format!("symbol_filters {}", symbol));
        Ok(state.filters.get(symbol).cloned())
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let state = self.record(format!("set_leverage {} {}", symbol, leverage));
        if state.fail_leverage {
            bail!("Binance API error -4028: Leverage 50 is not valid");
        }
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<()> {
        let mut state = self.record(format!("cancel_all_open_orders {}", symbol));
        if state.fail_cancel {
            bail!("Binance API error -1003: Too many requests");
        }
        state.open_orders.retain(|(s, _)| s != symbol);
        Ok(())
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<()> {
        let mut state = self.record(format!("cancel_order {} {}", symbol, order_id));
        let before = state.open_orders.len();
        state.open_orders.retain(|(s, id)| !(s == symbol && *id == order_id));
        if state.open_orders.len() == before {
            bail!("Binance API error -2011: Unknown order sent.");
        }
        Ok(())
    }

    async fn open_order_count(&self, symbol: &str) -> Result<usize> {
        let state = self.record(format!("open_order_count {}", symbol));
        Ok(state.open_orders.iter().filter(|(s, _)| s == symbol).count())
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
        let mut state = self.record(format!("place_order {} {}", order.type_name(), order.side.as_str()));
        if state.failing_order_types.contains(order.type_name()) {
            bail!("Binance API error -2021: Order would immediately trigger.");
        }

        let order_id = state.next_order_id;
        state.next_order_id += 1;
        state.placed.push(order.clone());

        match &order.kind {
            OrderKind::Market { quantity, .. } => {
                if state.fill_market_orders {
                    let signed = match order.side {
                        OrderSide::Buy => *quantity,
                        OrderSide::Sell => -*quantity,
                    };
                    *state.positions.entry(order.symbol.clone()).or_default() += signed;
                }
            }
            OrderKind::TakeProfitMarket { .. } | OrderKind::StopMarket { .. } => {
                state.open_orders.push((order.symbol.clone(), order_id));
            }
        }

        Ok(OrderAck {
            order_id,
            client_order_id: order.client_order_id.clone(),
            status: "NEW".to_string(),
        })
    }

    async fn positions(&self, symbol: &str) -> Result<Vec<PositionInfo>> {
        let state = self.record(format!("positions {}", symbol));
        Ok(vec![PositionInfo {
            symbol: symbol.to_string(),
            position_amt: state.positions.get(symbol).copied().unwrap_or(Decimal::ZERO),
            entry_price: state.prices.get(symbol).copied().unwrap_or(Decimal::ZERO),
        }])
    }
}
