//! Trade executor: turns one validated signal into an entry position with
//! take-profit and stop-loss protection.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::api::{Exchange, OrderAck, OrderRequest};
use crate::models::{OrderSide, SignalSide, TrackedPosition, TradingSignal};

use super::levels::{compute_levels, validate_levels, ProtectiveLevels};
use super::rounding::round_to_tick;
use super::{
    LevelSource, PositionSizer, PositionTracker, ProtectiveKind, SettlePoller, TradeError,
    TradingConfig,
};

/// Progress of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    PriceFetched,
    Sized,
    OrdersCancelled,
    PositionClosed,
    PositionOpened,
    ProtectiveOrdersPlaced,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionState::Idle => "Idle",
            ExecutionState::PriceFetched => "PriceFetched",
            ExecutionState::Sized => "Sized",
            ExecutionState::OrdersCancelled => "OrdersCancelled",
            ExecutionState::PositionClosed => "PositionClosed",
            ExecutionState::PositionOpened => "PositionOpened",
            ExecutionState::ProtectiveOrdersPlaced => "ProtectiveOrdersPlaced",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub symbol: String,
    pub side: SignalSide,
    pub quantity: Decimal,

    /// Last price seen before sizing
    pub price: Decimal,

    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub entry_order_id: i64,
    pub take_profit_order_id: i64,
    pub stop_loss_order_id: i64,
    pub state: ExecutionState,
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {} (TP {}, SL {})",
            self.side, self.quantity, self.symbol, self.price, self.take_profit, self.stop_loss
        )
    }
}

/// Executes signals against an exchange.
pub struct TradeExecutor<E> {
    exchange: Arc<E>,
    config: TradingConfig,
    sizer: PositionSizer,
    poller: SettlePoller,
    tracker: PositionTracker,
}

impl<E: Exchange> TradeExecutor<E> {
    pub fn new(exchange: Arc<E>, config: TradingConfig, tracker: PositionTracker) -> Self {
        Self {
            sizer: PositionSizer::new(&config),
            poller: SettlePoller::new(config.settle.clone()),
            exchange,
            config,
            tracker,
        }
    }

    pub fn config(&self) -> &TradingConfig {
        &self.config
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    /// Run the full entry sequence for a signal.
    ///
    /// Signals for the same symbol run one at a time.
    pub async fn execute(&self, signal: &TradingSignal) -> Result<ExecutionReport, TradeError> {
        let _guard = self.tracker.lock_symbol(&signal.symbol).await;

        info!(symbol = %signal.symbol, side = %signal.side, "Executing signal");
        let result = self.run(signal).await;

        match &result {
            Ok(report) => info!(
                symbol = %report.symbol,
                state = %report.state,
                entry_order_id = report.entry_order_id,
                take_profit_order_id = report.take_profit_order_id,
                stop_loss_order_id = report.stop_loss_order_id,
                "Signal executed: {}",
                report
            ),
            Err(e) => error!(
                symbol = %signal.symbol,
                class = ?e.class(),
                severity = ?e.severity(),
                error = %e,
                "Signal failed"
            ),
        }

        result
    }

    async fn run(&self, signal: &TradingSignal) -> Result<ExecutionReport, TradeError> {
        let symbol = signal.symbol.as_str();
        let mut state = ExecutionState::Idle;

        let price = self
            .exchange
            .ticker_price(symbol)
            .await
            .map_err(|e| TradeError::exchange("fetch price", symbol, e))?;
        advance(symbol, &mut state, ExecutionState::PriceFetched);
        debug!(symbol = symbol, price = %price, "Current price");

        let levels = self.protective_levels(signal, price)?;

        let filters = self
            .exchange
            .symbol_filters(symbol)
            .await
            .map_err(|e| TradeError::exchange("fetch symbol filters", symbol, e))?
            .ok_or_else(|| TradeError::SymbolNotFound(symbol.to_string()))?;

        let balance = self
            .exchange
            .usdt_balance()
            .await
            .map_err(|e| TradeError::exchange("fetch balance", symbol, e))?;

        // A level too large to snap to the tick is a bad payload, not an exchange fault
        let take_profit = round_to_tick(levels.take_profit, filters.tick_size)
            .map_err(|e| TradeError::InvalidSignal(format!("take profit: {:#}", e)))?;
        let stop_loss = round_to_tick(levels.stop_loss, filters.tick_size)
            .map_err(|e| TradeError::InvalidSignal(format!("stop loss: {:#}", e)))?;
        let sized = self
            .sizer
            .size(balance, price, &filters)
            .map_err(|e| TradeError::exchange("apply symbol filters", symbol, e))?;

        info!(
            symbol = symbol,
            balance = %balance,
            notional = %sized.notional,
            leverage = self.config.leverage,
            raw_quantity = %sized.raw_quantity,
            quantity = %sized.quantity,
            take_profit = %take_profit,
            stop_loss = %stop_loss,
            "Position sized"
        );
        advance(symbol, &mut state, ExecutionState::Sized);

        if let Err(e) = self.exchange.set_leverage(symbol, self.config.leverage).await {
            let err = TradeError::best_effort("set leverage", symbol, e);
            warn!(error = %err, "Continuing with current leverage");
        }

        self.cancel_open_orders(symbol).await;
        advance(symbol, &mut state, ExecutionState::OrdersCancelled);

        self.close_position(symbol).await?;
        advance(symbol, &mut state, ExecutionState::PositionClosed);

        let entry = OrderRequest::market(symbol, signal.side.entry_side(), sized.quantity);
        let entry_ack = self
            .exchange
            .place_order(&entry)
            .await
            .map_err(|e| TradeError::exchange("open position", symbol, e))?;
        info!(
            symbol = symbol,
            order_id = entry_ack.order_id,
            client_order_id = %entry_ack.client_order_id,
            status = %entry_ack.status,
            side = entry.side.as_str(),
            quantity = %sized.quantity,
            "Entry order placed"
        );

        let exchange = &self.exchange;
        let opened = self
            .poller
            .wait_until("position opened", move || async move {
                let positions = exchange.positions(symbol).await?;
                Ok(positions.iter().any(|p| p.is_open()))
            })
            .await;
        if !opened {
            return Err(TradeError::PositionNotOpened {
                symbol: symbol.to_string(),
            });
        }
        advance(symbol, &mut state, ExecutionState::PositionOpened);

        let (take_profit_ack, stop_loss_ack) = self
            .place_protective_orders(symbol, signal.side.exit_side(), take_profit, stop_loss)
            .await?;
        advance(symbol, &mut state, ExecutionState::ProtectiveOrdersPlaced);

        let tracked = TrackedPosition {
            symbol: symbol.to_string(),
            take_profit_order_id: take_profit_ack.order_id,
            stop_loss_order_id: stop_loss_ack.order_id,
            side: signal.side,
            quantity: sized.quantity,
            opened_at: Utc::now(),
        };
        if let Some(previous) = self.tracker.insert(tracked).await {
            debug!(
                symbol = symbol,
                take_profit_order_id = previous.take_profit_order_id,
                stop_loss_order_id = previous.stop_loss_order_id,
                "Replaced tracked position"
            );
        }

        Ok(ExecutionReport {
            symbol: symbol.to_string(),
            side: signal.side,
            quantity: sized.quantity,
            price,
            take_profit,
            stop_loss,
            entry_order_id: entry_ack.order_id,
            take_profit_order_id: take_profit_ack.order_id,
            stop_loss_order_id: stop_loss_ack.order_id,
            state,
        })
    }

    fn protective_levels(
        &self,
        signal: &TradingSignal,
        price: Decimal,
    ) -> Result<ProtectiveLevels, TradeError> {
        match self.config.level_source {
            LevelSource::Signal => match (signal.take_profit, signal.stop_loss) {
                (Some(take_profit), Some(stop_loss)) => {
                    validate_levels(signal.side, price, take_profit, stop_loss)
                }
                (take_profit, stop_loss) => {
                    let mut missing = Vec::new();
                    if take_profit.is_none() {
                        missing.push("tp");
                    }
                    if stop_loss.is_none() {
                        missing.push("sl");
                    }
                    Err(TradeError::MissingFields(missing))
                }
            },
            LevelSource::Computed => Ok(compute_levels(
                signal.side,
                price,
                self.config.stop_loss_pct,
                self.config.risk_reward_ratio,
            )),
        }
    }

    /// Cancel everything resting on the symbol. Never fails the execution.
    async fn cancel_open_orders(&self, symbol: &str) {
        if let Err(e) = self.exchange.cancel_all_open_orders(symbol).await {
            let err = TradeError::best_effort("cancel open orders", symbol, e);
            warn!(error = %err, "Continuing without cancel");
            return;
        }

        let exchange = &self.exchange;
        let cleared = self
            .poller
            .wait_until("open orders cancelled", move || async move {
                Ok(exchange.open_order_count(symbol).await? == 0)
            })
            .await;
        if !cleared {
            warn!(symbol = symbol, "Open orders still reported after cancel");
        }
    }

    /// Flatten any existing position and wait until the exchange reports it gone.
    async fn close_position(&self, symbol: &str) -> Result<(), TradeError> {
        let positions = self
            .exchange
            .positions(symbol)
            .await
            .map_err(|e| TradeError::exchange("fetch positions", symbol, e))?;

        let open: Vec<_> = positions.into_iter().filter(|p| p.is_open()).collect();
        if open.is_empty() {
            return Ok(());
        }

        for position in &open {
            let order = OrderRequest::close(
                symbol,
                OrderSide::closing(position.position_amt),
                position.position_amt.abs(),
            );
            let ack = self
                .exchange
                .place_order(&order)
                .await
                .map_err(|e| TradeError::exchange("close position", symbol, e))?;
            info!(
                symbol = symbol,
                order_id = ack.order_id,
                position_amt = %position.position_amt,
                "Closing existing position"
            );
        }

        let exchange = &self.exchange;
        let flat = self
            .poller
            .wait_until("position closed", move || async move {
                let positions = exchange.positions(symbol).await?;
                Ok(!positions.iter().any(|p| p.is_open()))
            })
            .await;
        if !flat {
            return Err(TradeError::PositionNotClosed {
                symbol: symbol.to_string(),
            });
        }
        Ok(())
    }

    /// Place take-profit then stop-loss. On failure the position is not left
    /// with one-sided protection: siblings are cancelled and the position is
    /// flattened, both best-effort.
    async fn place_protective_orders(
        &self,
        symbol: &str,
        exit_side: OrderSide,
        take_profit: Decimal,
        stop_loss: Decimal,
    ) -> Result<(OrderAck, OrderAck), TradeError> {
        let tp_order = OrderRequest::take_profit(symbol, exit_side, take_profit);
        let tp_ack = match self.exchange.place_order(&tp_order).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(symbol = symbol, error = %e, "Take-profit order failed, flattening position");
                self.flatten(symbol).await;
                return Err(TradeError::ProtectiveOrder {
                    kind: ProtectiveKind::TakeProfit,
                    symbol: symbol.to_string(),
                    error: e,
                });
            }
        };
        info!(symbol = symbol, order_id = tp_ack.order_id, stop_price = %take_profit, "Take-profit placed");

        let sl_order = OrderRequest::stop_loss(symbol, exit_side, stop_loss);
        let sl_ack = match self.exchange.place_order(&sl_order).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(
                    symbol = symbol,
                    error = %e,
                    "Stop-loss order failed, cancelling take-profit and flattening position"
                );
                if let Err(cancel_err) = self.exchange.cancel_order(symbol, tp_ack.order_id).await {
                    let err = TradeError::best_effort("cancel take-profit order", symbol, cancel_err);
                    error!(order_id = tp_ack.order_id, error = %err, "Cleanup failed");
                }
                self.flatten(symbol).await;
                return Err(TradeError::ProtectiveOrder {
                    kind: ProtectiveKind::StopLoss,
                    symbol: symbol.to_string(),
                    error: e,
                });
            }
        };
        info!(symbol = symbol, order_id = sl_ack.order_id, stop_price = %stop_loss, "Stop-loss placed");

        Ok((tp_ack, sl_ack))
    }

    /// Best-effort market close of whatever is open on the symbol.
    async fn flatten(&self, symbol: &str) {
        let positions = match self.exchange.positions(symbol).await {
            Ok(positions) => positions,
            Err(e) => {
                let err = TradeError::best_effort("fetch positions for cleanup", symbol, e);
                error!(error = %err, "Position left open");
                return;
            }
        };

        for position in positions.iter().filter(|p| p.is_open()) {
            let order = OrderRequest::close(
                symbol,
                OrderSide::closing(position.position_amt),
                position.position_amt.abs(),
            );
            match self.exchange.place_order(&order).await {
                Ok(ack) => warn!(
                    symbol = symbol,
                    order_id = ack.order_id,
                    position_amt = %position.position_amt,
                    "Position flattened"
                ),
                Err(e) => {
                    let err = TradeError::best_effort("flatten position", symbol, e);
                    error!(position_amt = %position.position_amt, error = %err, "Position left open");
                }
            }
        }
    }
}

fn advance(symbol: &str, state: &mut ExecutionState, next: ExecutionState) {
    debug!(symbol = symbol, from = %state, to = %next, "State transition");
    *state = next;
}
