//! Order table with per-order locking.
//!
//! The index maps client ids to order handles and exchange ids to client ids.
//! It is held only long enough to look up, insert or remove handles. Each
//! order sits behind its own mutex, so updates to different orders proceed in
//! parallel while updates to one order are serialized.
//!
//! Lock order: the index may be held while locking an order, never the
//! reverse. No lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use super::order::TrackedOrder;
use super::status::OrderState;
use crate::types::error::{ConnectorError, ConnectorResult};

/// Shared handle to one tracked order.
pub type OrderHandle = Arc<Mutex<TrackedOrder>>;

/// Locks an order, recovering the data if a holder panicked.
pub(crate) fn lock(handle: &OrderHandle) -> MutexGuard<'_, TrackedOrder> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct OrderIndex {
    by_client_id: HashMap<String, OrderHandle>,
    by_exchange_id: HashMap<String, String>,
}

/// Order counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderTableStats {
    /// Orders tracked.
    pub total_orders: usize,
    /// Orders awaiting acknowledgement.
    pub pending_orders: usize,
    /// Open or partially filled orders.
    pub open_orders: usize,
    /// Orders awaiting cancel confirmation.
    pub pending_cancel_orders: usize,
    /// Filled orders.
    pub filled_orders: usize,
    /// Cancelled orders.
    pub cancelled_orders: usize,
    /// Failed orders.
    pub failed_orders: usize,
    /// Fills recorded across all orders.
    pub total_fills: usize,
}

/// Concurrent order table keyed by client and exchange order id.
#[derive(Debug, Default)]
pub struct OrderTable {
    index: RwLock<OrderIndex>,
}

impl OrderTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an order.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOrder` if the client id is already tracked and
    /// `reject_duplicates` is set.
    pub fn insert(&self, order: TrackedOrder, reject_duplicates: bool) -> ConnectorResult<OrderHandle> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        if reject_duplicates && index.by_client_id.contains_key(&order.client_order_id) {
            return Err(ConnectorError::DuplicateOrder(order.client_order_id));
        }

        let client_order_id = order.client_order_id.clone();
        if let Some(exchange_order_id) = &order.exchange_order_id {
            index
                .by_exchange_id
                .insert(exchange_order_id.clone(), client_order_id.clone());
        }
        let handle = Arc::new(Mutex::new(order));
        index.by_client_id.insert(client_order_id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Handle by client order id.
    #[must_use]
    pub fn get(&self, client_order_id: &str) -> Option<OrderHandle> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_client_id
            .get(client_order_id)
            .cloned()
    }

    /// Handle by exchange order id.
    #[must_use]
    pub fn get_by_exchange_id(&self, exchange_order_id: &str) -> Option<OrderHandle> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let client_order_id = index.by_exchange_id.get(exchange_order_id)?;
        index.by_client_id.get(client_order_id).cloned()
    }

    /// Handle by client id, falling back to exchange id.
    #[must_use]
    pub fn resolve(
        &self,
        client_order_id: Option<&str>,
        exchange_order_id: Option<&str>,
    ) -> Option<OrderHandle> {
        client_order_id
            .and_then(|id| self.get(id))
            .or_else(|| exchange_order_id.and_then(|id| self.get_by_exchange_id(id)))
    }

    /// Indexes an exchange order id for a client order id.
    pub fn index_exchange_id(&self, client_order_id: &str, exchange_order_id: &str) {
        if exchange_order_id.is_empty() {
            return;
        }
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .by_exchange_id
            .insert(exchange_order_id.to_string(), client_order_id.to_string());
    }

    /// Snapshot of one order.
    #[must_use]
    pub fn snapshot(&self, client_order_id: &str) -> Option<TrackedOrder> {
        self.get(client_order_id).map(|handle| lock(&handle).clone())
    }

    fn handles(&self) -> Vec<OrderHandle> {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_client_id
            .values()
            .cloned()
            .collect()
    }

    /// Snapshots of every order matching `predicate`.
    pub fn collect<F>(&self, predicate: F) -> Vec<TrackedOrder>
    where
        F: Fn(&TrackedOrder) -> bool,
    {
        self.handles()
            .iter()
            .filter_map(|handle| {
                let order = lock(handle);
                predicate(&order).then(|| order.clone())
            })
            .collect()
    }

    /// Removes orders matching `predicate` and returns them.
    fn remove_where<F>(&self, predicate: F) -> Vec<TrackedOrder>
    where
        F: Fn(&TrackedOrder) -> bool,
    {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let doomed: Vec<TrackedOrder> = index
            .by_client_id
            .values()
            .filter_map(|handle| {
                let order = lock(handle);
                predicate(&order).then(|| order.clone())
            })
            .collect();

        for order in &doomed {
            index.by_client_id.remove(&order.client_order_id);
            if let Some(exchange_order_id) = &order.exchange_order_id {
                index.by_exchange_id.remove(exchange_order_id);
            }
        }
        doomed
    }

    /// Removes and returns every terminal order.
    pub fn drain_terminal(&self) -> Vec<TrackedOrder> {
        self.remove_where(TrackedOrder::is_terminal)
    }

    /// Removes terminal orders last updated more than `retention_ms` before
    /// `now_ms`. Returns how many were removed.
    pub fn cleanup(&self, retention_ms: u64, now_ms: u64) -> usize {
        self.remove_where(|order| {
            order.is_terminal() && now_ms.saturating_sub(order.last_update_ts) > retention_ms
        })
        .len()
    }

    /// Number of tracked orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_client_id
            .len()
    }

    /// Returns true if no order is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Order counts by state.
    #[must_use]
    pub fn stats(&self) -> OrderTableStats {
        let mut stats = OrderTableStats::default();
        for handle in self.handles() {
            let order = lock(&handle);
            stats.total_orders += 1;
            stats.total_fills += order.fill_ids.len();
            match order.state {
                OrderState::PendingCreate => stats.pending_orders += 1,
                OrderState::Open | OrderState::PartiallyFilled => stats.open_orders += 1,
                OrderState::PendingCancel => stats.pending_cancel_orders += 1,
                OrderState::Filled => stats.filled_orders += 1,
                OrderState::Cancelled => stats.cancelled_orders += 1,
                OrderState::Failed => stats.failed_orders += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::execution::types::NewOrder;

    fn tracked(id: &str) -> TrackedOrder {
        TrackedOrder::new(NewOrder::limit_buy(id, "BTC-USD", dec!(100), dec!(1)), 1_000)
    }

    #[test]
    fn test_insert_and_lookup() {
        let table = OrderTable::new();
        table.insert(tracked("c1"), true).unwrap();
        table.index_exchange_id("c1", "88");

        assert!(table.get("c1").is_some());
        assert!(table.get_by_exchange_id("88").is_some());
        assert!(table.resolve(Some("missing"), Some("88")).is_some());
        assert!(table.resolve(None, Some("99")).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let table = OrderTable::new();
        table.insert(tracked("c1"), true).unwrap();
        assert!(matches!(
            table.insert(tracked("c1"), true),
            Err(ConnectorError::DuplicateOrder(_))
        ));
        assert!(table.insert(tracked("c1"), false).is_ok());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drain_terminal_removes_both_keys() {
        let table = OrderTable::new();
        let handle = table.insert(tracked("c1"), true).unwrap();
        table.insert(tracked("c2"), true).unwrap();
        {
            let mut order = lock(&handle);
            order.bind_exchange_order_id("88");
            order.apply_state(OrderState::Cancelled, 2_000);
        }
        table.index_exchange_id("c1", "88");

        let drained = table.drain_terminal();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].client_order_id, "c1");
        assert!(table.get_by_exchange_id("88").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_cleanup_respects_retention() {
        let table = OrderTable::new();
        let handle = table.insert(tracked("c1"), true).unwrap();
        lock(&handle).apply_state(OrderState::Failed, 2_000);

        assert_eq!(table.cleanup(5_000, 6_000), 0);
        assert_eq!(table.cleanup(5_000, 7_001), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_stats() {
        let table = OrderTable::new();
        table.insert(tracked("c1"), true).unwrap();
        let handle = table.insert(tracked("c2"), true).unwrap();
        lock(&handle).apply_state(OrderState::Open, 1_001);

        let stats = table.stats();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.pending_orders, 1);
        assert_eq!(stats.open_orders, 1);
    }

    #[test]
    fn test_parallel_updates_to_distinct_orders() {
        let table = Arc::new(OrderTable::new());
        for i in 0..8 {
            table.insert(tracked(&format!("c{i}")), true).unwrap();
        }

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let handle = table.get(&format!("c{i}")).unwrap();
                    lock(&handle).apply_state(OrderState::Open, 1_001);
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(table.stats().open_orders, 8);
    }
}
