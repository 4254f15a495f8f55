//! Cleans up protective orders of positions closed outside the executor.
//!
//! When a take-profit or stop-loss fills, the sibling order keeps resting on
//! the book. The account feed reports the position at zero size; the monitor
//! then cancels whatever is left on that symbol and forgets the position.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::api::user_stream::AccountUpdate;
use crate::api::Exchange;
use crate::trading::PositionTracker;

pub struct PositionMonitor<E> {
    exchange: Arc<E>,
    tracker: PositionTracker,
}

impl<E: Exchange> PositionMonitor<E> {
    pub fn new(exchange: Arc<E>, tracker: PositionTracker) -> Self {
        Self { exchange, tracker }
    }

    /// Consume account updates until the feed closes.
    ///
    /// Each symbol is cleaned up in its own task, so a symbol held by a
    /// running execution does not delay the others or back up the feed.
    pub async fn run(self, mut updates: mpsc::Receiver<AccountUpdate>) {
        info!("Position monitor started");
        let monitor = Arc::new(self);
        let mut cleanups = JoinSet::new();

        while let Some(update) = updates.recv().await {
            for symbol in monitor.closed_symbols(&update).await {
                let monitor = monitor.clone();
                let reason = update.reason.clone();
                cleanups.spawn(async move {
                    monitor.clean_up(&symbol, &reason).await;
                });
            }
            while cleanups.try_join_next().is_some() {}
        }

        while cleanups.join_next().await.is_some() {}
        info!("Position monitor stopped");
    }

    /// Process one update in place, returning the symbols that were cleaned up.
    pub async fn handle_update(&self, update: &AccountUpdate) -> Vec<String> {
        let mut cleaned = Vec::new();
        for symbol in self.closed_symbols(update).await {
            if self.clean_up(&symbol, &update.reason).await {
                cleaned.push(symbol);
            }
        }
        cleaned
    }

    /// Tracked symbols the update reports at zero size.
    async fn closed_symbols(&self, update: &AccountUpdate) -> Vec<String> {
        let mut symbols = Vec::new();
        for position in update.positions.iter().filter(|p| p.position_amount.is_zero()) {
            if self.tracker.contains(&position.symbol).await && !symbols.contains(&position.symbol) {
                symbols.push(position.symbol.clone());
            }
        }
        symbols
    }

    /// Cancel what is left on a flat symbol and forget it.
    async fn clean_up(&self, symbol: &str, reason: &str) -> bool {
        // Wait out any execution on the symbol; it may have reopened the position
        let _guard = self.tracker.lock_symbol(symbol).await;
        if !self.tracker.contains(symbol).await {
            return false;
        }
        match self.exchange.positions(symbol).await {
            Ok(current) if current.iter().any(|p| p.is_open()) => {
                debug!(symbol = symbol, "Stale close event, position is open again");
                return false;
            }
            Ok(_) => {}
            Err(e) => warn!(symbol = symbol, error = %e, "Could not confirm position state"),
        }

        if let Err(e) = self.exchange.cancel_all_open_orders(symbol).await {
            error!(symbol = symbol, error = %e, "Failed to cancel remaining protective orders");
        }

        if let Some(tracked) = self.tracker.remove(symbol).await {
            info!(
                symbol = symbol,
                reason = reason,
                take_profit_order_id = tracked.take_profit_order_id,
                stop_loss_order_id = tracked.stop_loss_order_id,
                "Position closed, protective orders cleaned up"
            );
        }
        true
    }
}
