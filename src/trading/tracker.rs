//! In-process store of positions opened by the relay.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::models::TrackedPosition;

/// Tracked positions keyed by symbol; at most one entry per symbol.
///
/// Cloning shares the same store. Nothing is persisted: the map is empty
/// after a restart.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    positions: Arc<RwLock<HashMap<String, TrackedPosition>>>,

    /// Serializes work on one symbol (executions and cleanups)
    symbol_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position, returning the entry it replaced.
    pub async fn insert(&self, position: TrackedPosition) -> Option<TrackedPosition> {
        let mut positions = self.positions.write().await;
        positions.insert(position.symbol.clone(), position)
    }

    pub async fn get(&self, symbol: &str) -> Option<TrackedPosition> {
        let positions = self.positions.read().await;
        positions.get(symbol).cloned()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        let positions = self.positions.read().await;
        positions.contains_key(symbol)
    }

    pub async fn remove(&self, symbol: &str) -> Option<TrackedPosition> {
        let mut positions = self.positions.write().await;
        positions.remove(symbol)
    }

    pub async fn len(&self) -> usize {
        self.positions.read().await.len()
    }

    /// Exclusive access to a symbol until the guard is dropped.
    pub async fn lock_symbol(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.symbol_locks.lock().await;
            // Only the map holds an idle lock; nobody owns or waits on it
            locks.retain(|key, lock| key == symbol || Arc::strong_count(lock) > 1);
            locks.entry(symbol.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// All tracked positions, sorted by symbol.
    pub async fn snapshot(&self) -> Vec<TrackedPosition> {
        let positions = self.positions.read().await;
        let mut all: Vec<_> = positions.values().cloned().collect();
        all.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        all
    }
}
