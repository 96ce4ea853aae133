//! Order and account reconciliation.
//!
//! The [`Reconciler`] is the single place where order, fill, position and
//! balance state changes. Push events, poll results and responses to
//! user-initiated actions all enter through the same `apply_*` and
//! `reconcile_*` methods, so whichever source arrives first the outcome is
//! decided by the transition lattice and timestamps alone.
//!
//! # Example
//!
//! ```rust
//! use decibel_perp_rs::dec;
//! use decibel_perp_rs::execution::{
//!     FillEvent, FillOutcome, NewOrder, OrderState, Reconciler, ReconcilerConfig,
//! };
//!
//! let reconciler = Reconciler::new(ReconcilerConfig::default());
//! reconciler
//!     .register_order(NewOrder::limit_sell("c-1", "ETH-USD", dec!(3000), dec!(2)), 10)
//!     .unwrap();
//! reconciler.process_creation_response("c-1", "501", 11).unwrap();
//!
//! let fill = FillEvent::new("f-1", "501", dec!(3000), dec!(0.5), 12);
//! assert_eq!(reconciler.apply_fill_event(&fill), FillOutcome::Applied);
//! assert_eq!(reconciler.apply_fill_event(&fill), FillOutcome::Duplicate);
//!
//! let order = reconciler.order("c-1").unwrap();
//! assert_eq!(order.state, OrderState::PartiallyFilled);
//! assert_eq!(order.executed_amount_base, dec!(0.5));
//! ```

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use super::account::{AccountBook, BalanceTable, PositionTable, PositionsReport};
use super::events::{ConnectorEvent, DEFAULT_EVENT_CAPACITY, EventBus, OrderUpdateEvent};
use super::order::{FillOutcome, TrackedOrder, UpdateOutcome};
use super::status::OrderState;
use super::table::{OrderTable, OrderTableStats, lock};
use super::types::{FillEvent, NewOrder, OrderEvent, OrderUpdate, TradeFill};
use crate::Decimal;
use crate::config::{AbsentPositionPolicy, FeeSchedule, PositionMode, split_trading_pair};
use crate::types::error::{ConnectorError, ConnectorResult};
use crate::wire::{self, WireBalances, WirePosition};

/// Fee asset used when a trading pair has no quote part.
const DEFAULT_FEE_ASSET: &str = "USD";

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// How positions are keyed.
    pub position_mode: PositionMode,
    /// Fee model applied to fills.
    pub fee_schedule: FeeSchedule,
    /// Treatment of trading pairs missing from a positions poll.
    pub absent_position_policy: AbsentPositionPolicy,
    /// Reject registering a client order id that is already tracked.
    pub detect_duplicates: bool,
    /// Event bus capacity per subscriber.
    pub event_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            position_mode: PositionMode::default(),
            fee_schedule: FeeSchedule::default(),
            absent_position_policy: AbsentPositionPolicy::default(),
            detect_duplicates: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ReconcilerConfig {
    /// Sets the position mode.
    #[must_use]
    pub fn with_position_mode(mut self, mode: PositionMode) -> Self {
        self.position_mode = mode;
        self
    }

    /// Sets the fee schedule.
    #[must_use]
    pub fn with_fee_schedule(mut self, schedule: FeeSchedule) -> Self {
        self.fee_schedule = schedule;
        self
    }

    /// Sets the absent position policy.
    #[must_use]
    pub fn with_absent_position_policy(mut self, policy: AbsentPositionPolicy) -> Self {
        self.absent_position_policy = policy;
        self
    }

    /// Enables or disables duplicate client id detection.
    #[must_use]
    pub fn with_detect_duplicates(mut self, detect: bool) -> Self {
        self.detect_duplicates = detect;
        self
    }
}

/// Authoritative view of orders, fills, positions and balances.
///
/// All methods take `&self`; share the reconciler behind an `Arc`.
#[derive(Debug)]
pub struct Reconciler {
    config: ReconcilerConfig,
    orders: OrderTable,
    account: AccountBook,
    events: EventBus,
}

impl Reconciler {
    /// Creates an empty reconciler.
    #[must_use]
    pub fn new(config: ReconcilerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            orders: OrderTable::new(),
            account: AccountBook::new(),
            events,
        }
    }

    /// Creates a reconciler with default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(ReconcilerConfig::default())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Subscribes to connector events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.events.subscribe()
    }

    /// The event bus, for publishers outside the reconciler.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ------------------------------------------------------------------
    // Order lifecycle
    // ------------------------------------------------------------------

    /// Starts tracking an order in `PendingCreate`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOrder` if the client id is already tracked and
    /// duplicate detection is on.
    pub fn register_order(&self, order: NewOrder, timestamp_ms: u64) -> ConnectorResult<TrackedOrder> {
        let tracked = TrackedOrder::new(order, timestamp_ms);
        let handle = self.orders.insert(tracked, self.config.detect_duplicates)?;
        let snapshot = lock(&handle).clone();
        debug!(
            client_order_id = %snapshot.client_order_id,
            trading_pair = %snapshot.trading_pair,
            side = snapshot.side.as_str(),
            amount = %snapshot.amount,
            "order registered"
        );
        Ok(snapshot)
    }

    /// Binds the exchange id from a create response and moves the order to
    /// `Open`.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` if the client id is not tracked.
    pub fn process_creation_response(
        &self,
        client_order_id: &str,
        exchange_order_id: &str,
        timestamp_ms: u64,
    ) -> ConnectorResult<UpdateOutcome> {
        self.require(client_order_id)?;
        let update = OrderUpdate::new(client_order_id, OrderState::Open, timestamp_ms)
            .with_exchange_order_id(exchange_order_id);
        Ok(self.apply_order_update(&update))
    }

    /// Marks an order whose submission failed.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` if the client id is not tracked.
    pub fn process_creation_failure(
        &self,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> ConnectorResult<UpdateOutcome> {
        self.transition(client_order_id, OrderState::Failed, timestamp_ms)
    }

    /// Moves an order to `PendingCancel` before the cancel request is sent.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` if the client id is not tracked.
    pub fn begin_cancel(&self, client_order_id: &str, timestamp_ms: u64) -> ConnectorResult<UpdateOutcome> {
        self.transition(client_order_id, OrderState::PendingCancel, timestamp_ms)
    }

    /// Confirms a cancel acknowledged by the exchange.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` if the client id is not tracked.
    pub fn process_cancel_confirmation(
        &self,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> ConnectorResult<UpdateOutcome> {
        self.transition(client_order_id, OrderState::Cancelled, timestamp_ms)
    }

    /// Returns an order to `Open` (or `PartiallyFilled` if it has fills)
    /// after the exchange refused to cancel it.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` if the client id is not tracked.
    pub fn process_cancel_rejection(
        &self,
        client_order_id: &str,
        timestamp_ms: u64,
    ) -> ConnectorResult<UpdateOutcome> {
        self.transition(client_order_id, OrderState::Open, timestamp_ms)
    }

    fn require(&self, client_order_id: &str) -> ConnectorResult<()> {
        if self.orders.get(client_order_id).is_none() {
            return Err(ConnectorError::OrderNotFound(client_order_id.to_string()));
        }
        Ok(())
    }

    fn transition(
        &self,
        client_order_id: &str,
        state: OrderState,
        timestamp_ms: u64,
    ) -> ConnectorResult<UpdateOutcome> {
        self.require(client_order_id)?;
        Ok(self.apply_order_update(&OrderUpdate::new(client_order_id, state, timestamp_ms)))
    }

    // ------------------------------------------------------------------
    // Push and poll entry points
    // ------------------------------------------------------------------

    /// Applies a raw order status observation.
    ///
    /// The order is looked up by client id, then by exchange id. Unknown
    /// orders are dropped.
    pub fn apply_order_event(&self, event: &OrderEvent) -> UpdateOutcome {
        let Some(handle) = self
            .orders
            .resolve(event.client_order_id.as_deref(), event.exchange_order_id.as_deref())
        else {
            debug!(
                client_order_id = ?event.client_order_id,
                exchange_order_id = ?event.exchange_order_id,
                status = %event.status,
                "dropping order event for untracked order"
            );
            return UpdateOutcome::UnknownOrder;
        };
        let client_order_id = lock(&handle).client_order_id.clone();

        let mut update = OrderUpdate::new(
            client_order_id,
            OrderState::from_exchange_status(&event.status),
            event.timestamp_ms,
        );
        update.exchange_order_id = event.exchange_order_id.clone();
        self.apply_order_update(&update)
    }

    /// Applies a state candidate to a tracked order.
    pub fn apply_order_update(&self, update: &OrderUpdate) -> UpdateOutcome {
        let Some(handle) = self.orders.get(&update.client_order_id) else {
            debug!(client_order_id = %update.client_order_id, "dropping update for untracked order");
            return UpdateOutcome::UnknownOrder;
        };

        // The order lock is released before the index is touched.
        let (outcome, previous_ts, bound, event) = {
            let mut order = lock(&handle);
            let previous_ts = order.last_update_ts;
            let bound = match update.exchange_order_id.as_deref() {
                Some(id) if order.bind_exchange_order_id(id) => Some(id.to_string()),
                _ => None,
            };
            let outcome = order.apply_state(update.new_state, update.timestamp_ms);
            let event = match outcome {
                UpdateOutcome::Applied { from, to } => Some(OrderUpdateEvent {
                    client_order_id: order.client_order_id.clone(),
                    exchange_order_id: order.exchange_order_id.clone(),
                    trading_pair: order.trading_pair.clone(),
                    previous_state: from,
                    new_state: to,
                    timestamp_ms: update.timestamp_ms,
                }),
                _ => None,
            };
            (outcome, previous_ts, bound, event)
        };

        if let Some(exchange_order_id) = bound {
            self.orders
                .index_exchange_id(&update.client_order_id, &exchange_order_id);
        }

        match outcome {
            UpdateOutcome::Applied { from, to } => {
                if update.timestamp_ms == previous_ts
                    && from != OrderState::PendingCreate
                    && !to.is_terminal()
                {
                    warn!(
                        client_order_id = %update.client_order_id,
                        from = %from,
                        to = %to,
                        timestamp_ms = update.timestamp_ms,
                        "conflicting states at equal timestamp, keeping the later write"
                    );
                }
                debug!(
                    client_order_id = %update.client_order_id,
                    from = %from,
                    to = %to,
                    "order state updated"
                );
            }
            UpdateOutcome::Rejected { from, to } => warn!(
                client_order_id = %update.client_order_id,
                from = %from,
                to = %to,
                "transition not allowed, update ignored"
            ),
            UpdateOutcome::Stale => debug!(
                client_order_id = %update.client_order_id,
                timestamp_ms = update.timestamp_ms,
                last_update_ts = previous_ts,
                "stale order update ignored"
            ),
            UpdateOutcome::IgnoredTerminal => trace!(
                client_order_id = %update.client_order_id,
                "update for terminal order ignored"
            ),
            UpdateOutcome::Duplicate | UpdateOutcome::UnknownOrder => {}
        }

        if let Some(event) = event {
            self.events.publish(ConnectorEvent::OrderUpdate(event));
        }
        outcome
    }

    /// Records a fill against the order with its exchange order id.
    pub fn apply_fill_event(&self, fill: &FillEvent) -> FillOutcome {
        let Some(handle) = self.orders.get_by_exchange_id(&fill.exchange_order_id) else {
            warn!(
                fill_id = %fill.fill_id,
                exchange_order_id = %fill.exchange_order_id,
                "dropping fill for untracked order"
            );
            return FillOutcome::UnknownOrder;
        };

        let (trade, promotion) = {
            let mut order = lock(&handle);
            let is_maker = order.is_maker();
            let fee = match self.config.fee_schedule.rate(is_maker) {
                Some(rate) => fill.quote_amount() * rate,
                None => fill.reported_fee,
            };
            let previous_state = order.state;
            if !order.record_fill(fill, fee) {
                trace!(fill_id = %fill.fill_id, "duplicate fill ignored");
                return FillOutcome::Duplicate;
            }

            let fee_asset = split_trading_pair(&order.trading_pair)
                .map_or(DEFAULT_FEE_ASSET, |(_, quote)| quote)
                .to_string();
            let trade = TradeFill {
                fill_id: fill.fill_id.clone(),
                client_order_id: order.client_order_id.clone(),
                exchange_order_id: fill.exchange_order_id.clone(),
                trading_pair: order.trading_pair.clone(),
                side: order.side,
                price: fill.price,
                base_amount: fill.amount,
                quote_amount: fill.quote_amount(),
                fee,
                fee_asset,
                reported_fee: fill.reported_fee,
                is_maker,
                timestamp_ms: fill.timestamp_ms,
            };
            let promotion = (order.state != previous_state).then(|| OrderUpdateEvent {
                client_order_id: order.client_order_id.clone(),
                exchange_order_id: order.exchange_order_id.clone(),
                trading_pair: order.trading_pair.clone(),
                previous_state,
                new_state: order.state,
                timestamp_ms: fill.timestamp_ms,
            });
            (trade, promotion)
        };

        info!(
            client_order_id = %trade.client_order_id,
            fill_id = %trade.fill_id,
            price = %trade.price,
            amount = %trade.base_amount,
            fee = %trade.fee,
            "fill recorded"
        );
        if let Some(event) = promotion {
            self.events.publish(ConnectorEvent::OrderUpdate(event));
        }
        self.events.publish(ConnectorEvent::Trade(trade));
        FillOutcome::Applied
    }

    /// Replaces positions from a positions payload.
    ///
    /// `resolve` maps exchange symbols to trading pairs; entries it cannot
    /// map are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the payload is not a position list.
    pub fn reconcile_positions<F>(&self, raw: &Value, resolve: F) -> ConnectorResult<PositionsReport>
    where
        F: Fn(&str) -> Option<String>,
    {
        let entries: Vec<WirePosition> = wire::decode_list(raw)?;
        let report = self.account.reconcile_positions(
            entries,
            self.config.position_mode,
            self.config.absent_position_policy,
            resolve,
        );
        debug!(
            updated = report.updated,
            removed = report.removed,
            skipped = report.skipped,
            "positions reconciled"
        );
        Ok(report)
    }

    /// Replaces balances from a balances payload.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the payload matches none of the balance shapes.
    pub fn reconcile_balances(&self, raw: &Value) -> ConnectorResult<usize> {
        let payload: WireBalances = wire::decode(raw)?;
        let count = self.account.reconcile_balances(payload);
        debug!(assets = count, "balances reconciled");
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------

    /// Snapshot of an order by client id.
    #[must_use]
    pub fn order(&self, client_order_id: &str) -> Option<TrackedOrder> {
        self.orders.snapshot(client_order_id)
    }

    /// Snapshot of an order by exchange id.
    #[must_use]
    pub fn order_by_exchange_id(&self, exchange_order_id: &str) -> Option<TrackedOrder> {
        self.orders
            .get_by_exchange_id(exchange_order_id)
            .map(|handle| lock(&handle).clone())
    }

    /// Snapshots of every non-terminal order.
    #[must_use]
    pub fn active_orders(&self) -> Vec<TrackedOrder> {
        self.orders.collect(TrackedOrder::is_active)
    }

    /// Non-terminal orders that have an exchange id, the set a status poll
    /// can query.
    #[must_use]
    pub fn pollable_orders(&self) -> Vec<TrackedOrder> {
        self.orders
            .collect(|order| order.is_active() && order.exchange_order_id.is_some())
    }

    /// Positions snapshot.
    #[must_use]
    pub fn positions(&self) -> Arc<PositionTable> {
        self.account.positions()
    }

    /// Balances snapshot.
    #[must_use]
    pub fn balances(&self) -> Arc<BalanceTable> {
        self.account.balances()
    }

    /// Available balance of an asset, zero if unknown.
    #[must_use]
    pub fn available_balance(&self, asset: &str) -> Decimal {
        self.account.available_balance(asset)
    }

    /// Order counts by state.
    #[must_use]
    pub fn stats(&self) -> OrderTableStats {
        self.orders.stats()
    }

    /// Removes and returns terminal orders.
    pub fn drain_terminal(&self) -> Vec<TrackedOrder> {
        self.orders.drain_terminal()
    }

    /// Removes terminal orders older than `retention_ms`.
    pub fn cleanup(&self, retention_ms: u64, now_ms: u64) -> usize {
        let removed = self.orders.cleanup(retention_ms, now_ms);
        if removed > 0 {
            debug!(removed, "terminal orders cleaned up");
        }
        removed
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::execution::types::{OrderSide, PositionSide};
    use serde_json::json;

    fn reconciler() -> Reconciler {
        Reconciler::with_defaults()
    }

    fn open_order(reconciler: &Reconciler, client: &str, exchange: &str) {
        reconciler
            .register_order(NewOrder::limit_buy(client, "BTC-USD", dec!(50000), dec!(1)), 1_000)
            .unwrap();
        reconciler
            .process_creation_response(client, exchange, 1_001)
            .unwrap();
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");
        let again = reconciler.register_order(
            NewOrder::limit_buy("c1", "BTC-USD", dec!(1), dec!(1)),
            2_000,
        );
        assert!(matches!(again, Err(ConnectorError::DuplicateOrder(_))));

        let lenient = Reconciler::new(ReconcilerConfig::default().with_detect_duplicates(false));
        lenient
            .register_order(NewOrder::limit_buy("c1", "BTC-USD", dec!(1), dec!(1)), 1)
            .unwrap();
        assert!(
            lenient
                .register_order(NewOrder::limit_buy("c1", "BTC-USD", dec!(1), dec!(1)), 2)
                .is_ok()
        );
    }

    #[test]
    fn test_creation_response_binds_exchange_id() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");
        let order = reconciler.order_by_exchange_id("88").unwrap();
        assert_eq!(order.client_order_id, "c1");
        assert_eq!(order.state, OrderState::Open);
    }

    #[test]
    fn test_lifecycle_calls_require_tracked_order() {
        let reconciler = reconciler();
        assert!(matches!(
            reconciler.process_creation_response("nope", "1", 1),
            Err(ConnectorError::OrderNotFound(_))
        ));
        assert!(reconciler.begin_cancel("nope", 1).is_err());
    }

    #[test]
    fn test_creation_failure() {
        let reconciler = reconciler();
        reconciler
            .register_order(NewOrder::market_sell("c1", "BTC-USD", dec!(1)), 1_000)
            .unwrap();
        let outcome = reconciler.process_creation_failure("c1", 1_001).unwrap();
        assert!(outcome.is_applied());
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::Failed);
    }

    #[test]
    fn test_cancel_flow_and_rejection() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");
        reconciler.begin_cancel("c1", 1_002).unwrap();
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::PendingCancel);

        reconciler.process_cancel_rejection("c1", 1_003).unwrap();
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::Open);

        reconciler.begin_cancel("c1", 1_004).unwrap();
        reconciler.process_cancel_confirmation("c1", 1_005).unwrap();
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::Cancelled);
    }

    #[test]
    fn test_order_event_resolves_by_either_key() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");

        let by_exchange = OrderEvent::new("partial", 1_002).with_exchange_order_id("88");
        assert!(reconciler.apply_order_event(&by_exchange).is_applied());

        let by_client = OrderEvent::new("FILLED", 1_003).with_client_order_id("c1");
        assert!(reconciler.apply_order_event(&by_client).is_applied());
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::Filled);

        let unknown = OrderEvent::new("open", 1_004).with_exchange_order_id("99");
        assert_eq!(reconciler.apply_order_event(&unknown), UpdateOutcome::UnknownOrder);
    }

    #[test]
    fn test_push_before_creation_response_binds_exchange_id() {
        let reconciler = reconciler();
        reconciler
            .register_order(NewOrder::limit_buy("c1", "BTC-USD", dec!(100), dec!(1)), 1_000)
            .unwrap();
        let push = OrderEvent::new("open", 1_001)
            .with_client_order_id("c1")
            .with_exchange_order_id("88");
        assert!(reconciler.apply_order_event(&push).is_applied());

        // The later REST response is a duplicate of what push already did.
        assert_eq!(
            reconciler.process_creation_response("c1", "88", 1_002).unwrap(),
            UpdateOutcome::Duplicate
        );
        assert!(reconciler.order_by_exchange_id("88").is_some());
    }

    #[test]
    fn test_stale_and_terminal_updates_are_ignored() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");
        reconciler
            .apply_order_update(&OrderUpdate::new("c1", OrderState::Cancelled, 2_000));

        let stale = OrderUpdate::new("c1", OrderState::Open, 1_500);
        assert_eq!(reconciler.apply_order_update(&stale), UpdateOutcome::IgnoredTerminal);
        let newer = OrderUpdate::new("c1", OrderState::Open, 3_000);
        assert_eq!(reconciler.apply_order_update(&newer), UpdateOutcome::IgnoredTerminal);
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::Cancelled);
    }

    #[test]
    fn test_fill_fee_uses_role_rate() {
        let reconciler = reconciler();
        reconciler
            .register_order(
                NewOrder::limit_buy("maker", "BTC-USD", dec!(100), dec!(1)).post_only(),
                1_000,
            )
            .unwrap();
        reconciler.process_creation_response("maker", "1", 1_001).unwrap();
        open_order(&reconciler, "taker", "2");

        let mut events = reconciler.subscribe();
        reconciler.apply_fill_event(&FillEvent::new("f1", "1", dec!(100), dec!(1), 1_002));
        reconciler.apply_fill_event(&FillEvent::new("f2", "2", dec!(100), dec!(1), 1_003));

        assert_eq!(reconciler.order("maker").unwrap().cumulative_fee, dec!(0.02));
        assert_eq!(reconciler.order("taker").unwrap().cumulative_fee, dec!(0.05));

        let mut trades = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConnectorEvent::Trade(trade) = event {
                trades.push(trade);
            }
        }
        assert_eq!(trades.len(), 2);
        assert!(trades[0].is_maker);
        assert_eq!(trades[0].fee_asset, "USD");
        assert_eq!(trades[0].side, OrderSide::Buy);
    }

    #[test]
    fn test_flat_fee_schedule_uses_reported_fee() {
        let reconciler =
            Reconciler::new(ReconcilerConfig::default().with_fee_schedule(FeeSchedule::Flat));
        open_order(&reconciler, "c1", "88");
        let fill = FillEvent::new("f1", "88", dec!(100), dec!(1), 1_002).with_reported_fee(dec!(0.07));
        reconciler.apply_fill_event(&fill);
        assert_eq!(reconciler.order("c1").unwrap().cumulative_fee, dec!(0.07));
    }

    #[test]
    fn test_fill_for_unknown_order_is_dropped() {
        let reconciler = reconciler();
        let fill = FillEvent::new("f1", "404", dec!(1), dec!(1), 1);
        assert_eq!(reconciler.apply_fill_event(&fill), FillOutcome::UnknownOrder);
    }

    #[test]
    fn test_fill_emits_promotion_event() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");
        let mut events = reconciler.subscribe();
        reconciler.apply_fill_event(&FillEvent::new("f1", "88", dec!(100), dec!(0.5), 1_002));

        match events.try_recv().unwrap() {
            ConnectorEvent::OrderUpdate(update) => {
                assert_eq!(update.previous_state, OrderState::Open);
                assert_eq!(update.new_state, OrderState::PartiallyFilled);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events.try_recv().unwrap(), ConnectorEvent::Trade(_)));
    }

    #[test]
    fn test_applied_update_is_published() {
        let reconciler = reconciler();
        let mut events = reconciler.subscribe();
        open_order(&reconciler, "c1", "88");
        match events.try_recv().unwrap() {
            ConnectorEvent::OrderUpdate(update) => {
                assert_eq!(update.exchange_order_id.as_deref(), Some("88"));
                assert_eq!(update.new_state, OrderState::Open);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_reconcile_positions_and_balances() {
        let reconciler = Reconciler::new(
            ReconcilerConfig::default().with_position_mode(PositionMode::Hedge),
        );
        let report = reconciler
            .reconcile_positions(
                &json!({"data": [{"market": "BTC-PERP", "size": "-1", "entryPrice": "100"}]}),
                |symbol| (symbol == "BTC-PERP").then(|| "BTC-USD".to_string()),
            )
            .unwrap();
        assert_eq!(report.updated, 1);
        let positions = reconciler.positions();
        let key = ("BTC-USD".to_string(), Some(PositionSide::Short));
        assert_eq!(positions[&key].entry_price, dec!(100));

        reconciler
            .reconcile_balances(&json!({"balances": [{"currency": "USD", "total": "5"}]}))
            .unwrap();
        assert_eq!(reconciler.available_balance("USD"), dec!(5));
        assert!(reconciler.reconcile_balances(&json!("garbage")).is_err());
    }

    #[test]
    fn test_readers_and_drain() {
        let reconciler = reconciler();
        open_order(&reconciler, "c1", "88");
        reconciler
            .register_order(NewOrder::limit_buy("c2", "BTC-USD", dec!(1), dec!(1)), 1_000)
            .unwrap();
        assert_eq!(reconciler.active_orders().len(), 2);
        assert_eq!(reconciler.pollable_orders().len(), 1);

        reconciler.apply_order_event(&OrderEvent::new("filled", 1_002).with_exchange_order_id("88"));
        assert_eq!(reconciler.stats().filled_orders, 1);
        let drained = reconciler.drain_terminal();
        assert_eq!(drained.len(), 1);
        assert!(reconciler.order("c1").is_none());
        assert_eq!(reconciler.cleanup(0, 10_000), 0);
    }
}
