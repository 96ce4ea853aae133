//! Tracked order state and its mutation rules.

use std::collections::HashSet;

use crate::Decimal;

use super::status::OrderState;
use super::types::{FillEvent, NewOrder, OrderSide, OrderType, PositionAction};

/// Result of applying a state update to an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The order moved from `from` to `to`.
    Applied {
        /// Previous state.
        from: OrderState,
        /// New state.
        to: OrderState,
    },
    /// Same state at the same timestamp.
    Duplicate,
    /// Older than the order's last update.
    Stale,
    /// The order is already terminal.
    IgnoredTerminal,
    /// The lattice forbids the transition.
    Rejected {
        /// Current state.
        from: OrderState,
        /// Refused state.
        to: OrderState,
    },
    /// No tracked order matches the update.
    UnknownOrder,
}

impl UpdateOutcome {
    /// Returns true if the order changed state.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Result of applying a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// The fill was recorded.
    Applied,
    /// The fill id was already recorded.
    Duplicate,
    /// No tracked order has the fill's exchange order id.
    UnknownOrder,
}

/// An order owned by the order table.
///
/// Snapshots handed to callers are clones; mutation goes through the
/// reconciler so every change respects the lattice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedOrder {
    /// Client order id.
    pub client_order_id: String,
    /// Exchange order id, once assigned.
    pub exchange_order_id: Option<String>,
    /// Trading pair.
    pub trading_pair: String,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Requested price; `None` for market orders.
    pub price: Option<Decimal>,
    /// Requested base amount.
    pub amount: Decimal,
    /// Position action.
    pub position_action: PositionAction,
    /// Current state.
    pub state: OrderState,
    /// Cumulative filled base amount.
    pub executed_amount_base: Decimal,
    /// Cumulative filled quote amount.
    pub executed_amount_quote: Decimal,
    /// Cumulative fee in the quote asset.
    pub cumulative_fee: Decimal,
    /// Creation time in milliseconds.
    pub creation_ts: u64,
    /// Time of the last applied state update in milliseconds.
    pub last_update_ts: u64,
    /// Time of the last recorded fill in milliseconds.
    pub last_fill_ts: Option<u64>,
    /// Fill ids already recorded.
    pub fill_ids: HashSet<String>,
}

impl TrackedOrder {
    /// Creates a `PendingCreate` order.
    #[must_use]
    pub fn new(order: NewOrder, timestamp_ms: u64) -> Self {
        Self {
            client_order_id: order.client_order_id,
            exchange_order_id: None,
            trading_pair: order.trading_pair,
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            amount: order.amount,
            position_action: order.position_action,
            state: OrderState::PendingCreate,
            executed_amount_base: Decimal::ZERO,
            executed_amount_quote: Decimal::ZERO,
            cumulative_fee: Decimal::ZERO,
            creation_ts: timestamp_ms,
            last_update_ts: timestamp_ms,
            last_fill_ts: None,
            fill_ids: HashSet::new(),
        }
    }

    /// Returns true if the order is filled, cancelled or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Returns true if the order may still trade.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Returns true if fills are charged the maker rate.
    #[must_use]
    pub fn is_maker(&self) -> bool {
        self.order_type == OrderType::LimitMaker
    }

    /// Returns true if the order is reduce-only.
    #[must_use]
    pub fn is_reduce_only(&self) -> bool {
        self.position_action == PositionAction::Close
    }

    /// Unfilled base amount.
    #[must_use]
    pub fn remaining_amount(&self) -> Decimal {
        (self.amount - self.executed_amount_base).max(Decimal::ZERO)
    }

    /// Volume-weighted average fill price, if anything filled.
    #[must_use]
    pub fn average_fill_price(&self) -> Option<Decimal> {
        if self.executed_amount_base.is_zero() {
            None
        } else {
            Some(self.executed_amount_quote / self.executed_amount_base)
        }
    }

    /// Fill ratio in `[0, 1]`.
    #[must_use]
    pub fn fill_ratio(&self) -> Decimal {
        if self.amount.is_zero() {
            return Decimal::ZERO;
        }
        (self.executed_amount_base / self.amount).min(Decimal::ONE)
    }

    /// Age relative to `now_ms`.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.creation_ts)
    }

    /// Applies a candidate state observed at `timestamp_ms`.
    ///
    /// An `Open` candidate on an order that has fills reads as
    /// `PartiallyFilled`. At equal timestamps a terminal candidate wins over
    /// the current state.
    ///
    /// A terminal candidate older than the last update is still applied when
    /// the lattice allows it. Local actions stamp the order with the local
    /// clock, so an exchange terminal status can legitimately carry an
    /// earlier timestamp, and terminal states never roll back.
    pub fn apply_state(&mut self, candidate: OrderState, timestamp_ms: u64) -> UpdateOutcome {
        if self.state.is_terminal() {
            return UpdateOutcome::IgnoredTerminal;
        }

        let candidate = if candidate == OrderState::Open && !self.executed_amount_base.is_zero() {
            OrderState::PartiallyFilled
        } else {
            candidate
        };

        if timestamp_ms < self.last_update_ts {
            if !candidate.is_terminal() || !self.state.can_transition_to(candidate) {
                return UpdateOutcome::Stale;
            }
            let from = self.state;
            self.state = candidate;
            return UpdateOutcome::Applied { from, to: candidate };
        }
        if candidate == self.state {
            // Same state with a newer timestamp only refreshes the clock.
            self.last_update_ts = timestamp_ms;
            return UpdateOutcome::Duplicate;
        }
        if !self.state.can_transition_to(candidate) {
            return UpdateOutcome::Rejected {
                from: self.state,
                to: candidate,
            };
        }

        let from = self.state;
        self.state = candidate;
        self.last_update_ts = timestamp_ms;
        UpdateOutcome::Applied { from, to: candidate }
    }

    /// Binds the exchange order id if none is set. Returns true if bound.
    pub fn bind_exchange_order_id(&mut self, exchange_order_id: &str) -> bool {
        if self.exchange_order_id.is_some() || exchange_order_id.is_empty() {
            return false;
        }
        self.exchange_order_id = Some(exchange_order_id.to_string());
        true
    }

    /// Records a fill with its computed fee.
    ///
    /// Returns false if the fill id was already recorded. A fill promotes
    /// `PendingCreate` and `Open` to `PartiallyFilled` but never sets `Filled`.
    pub fn record_fill(&mut self, fill: &FillEvent, fee: Decimal) -> bool {
        if !self.fill_ids.insert(fill.fill_id.clone()) {
            return false;
        }

        self.executed_amount_base += fill.amount;
        self.executed_amount_quote += fill.quote_amount();
        self.cumulative_fee += fee;
        self.last_fill_ts = Some(self.last_fill_ts.unwrap_or(0).max(fill.timestamp_ms));

        if matches!(self.state, OrderState::PendingCreate | OrderState::Open) {
            self.state = OrderState::PartiallyFilled;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;

    fn order() -> TrackedOrder {
        TrackedOrder::new(NewOrder::limit_buy("c1", "BTC-USD", dec!(100), dec!(2)), 1_000)
    }

    #[test]
    fn test_new_order_is_pending_create() {
        let order = order();
        assert_eq!(order.state, OrderState::PendingCreate);
        assert_eq!(order.remaining_amount(), dec!(2));
        assert_eq!(order.average_fill_price(), None);
        assert!(!order.is_maker());
    }

    #[test]
    fn test_apply_state_timestamp_rules() {
        let mut order = order();
        assert_eq!(
            order.apply_state(OrderState::Open, 1_001),
            UpdateOutcome::Applied {
                from: OrderState::PendingCreate,
                to: OrderState::Open
            }
        );
        assert_eq!(order.apply_state(OrderState::Open, 1_001), UpdateOutcome::Duplicate);
        assert_eq!(order.apply_state(OrderState::PendingCancel, 1_000), UpdateOutcome::Stale);
        assert_eq!(order.state, OrderState::Open);
    }

    #[test]
    fn test_older_terminal_candidate_still_applies() {
        let mut order = order();
        order.apply_state(OrderState::Open, 1_001);
        order.apply_state(OrderState::PendingCancel, 2_000);
        order.apply_state(OrderState::Open, 2_001);

        assert_eq!(
            order.apply_state(OrderState::Filled, 1_999),
            UpdateOutcome::Applied {
                from: OrderState::Open,
                to: OrderState::Filled
            }
        );
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.last_update_ts, 2_001);
    }

    #[test]
    fn test_older_terminal_candidate_respects_lattice() {
        let mut order = order();
        order.apply_state(OrderState::Open, 1_001);
        order.apply_state(OrderState::PartiallyFilled, 1_002);
        assert_eq!(order.apply_state(OrderState::Failed, 1_000), UpdateOutcome::Stale);
        assert_eq!(order.state, OrderState::PartiallyFilled);
    }

    #[test]
    fn test_equal_timestamp_terminal_wins() {
        let mut order = order();
        order.apply_state(OrderState::Open, 2_000);
        assert!(order.apply_state(OrderState::Filled, 2_000).is_applied());
        assert_eq!(order.state, OrderState::Filled);
        assert_eq!(order.apply_state(OrderState::Open, 3_000), UpdateOutcome::IgnoredTerminal);
    }

    #[test]
    fn test_lattice_rejection() {
        let mut order = order();
        order.apply_state(OrderState::Open, 1_001);
        order.apply_state(OrderState::PartiallyFilled, 1_002);
        assert_eq!(
            order.apply_state(OrderState::Failed, 1_003),
            UpdateOutcome::Rejected {
                from: OrderState::PartiallyFilled,
                to: OrderState::Failed
            }
        );
        assert_eq!(order.last_update_ts, 1_002);
    }

    #[test]
    fn test_open_with_fills_reads_as_partial() {
        let mut order = order();
        order.apply_state(OrderState::Open, 1_001);
        order.record_fill(&FillEvent::new("f1", "88", dec!(100), dec!(0.5), 1_002), dec!(0));
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.apply_state(OrderState::Open, 1_003), UpdateOutcome::Duplicate);
        assert_eq!(order.state, OrderState::PartiallyFilled);
    }

    #[test]
    fn test_record_fill_accumulates_and_dedups() {
        let mut order = order();
        let fill = FillEvent::new("f1", "88", dec!(100), dec!(0.5), 1_002);
        assert!(order.record_fill(&fill, dec!(0.025)));
        assert!(!order.record_fill(&fill, dec!(0.025)));

        assert_eq!(order.executed_amount_base, dec!(0.5));
        assert_eq!(order.executed_amount_quote, dec!(50));
        assert_eq!(order.cumulative_fee, dec!(0.025));
        assert_eq!(order.average_fill_price(), Some(dec!(100)));
        assert_eq!(order.fill_ratio(), dec!(0.25));
        assert_eq!(order.last_fill_ts, Some(1_002));
        assert_eq!(order.last_update_ts, 1_000);
    }

    #[test]
    fn test_fill_never_sets_filled() {
        let mut order = order();
        order.apply_state(OrderState::Open, 1_001);
        order.record_fill(&FillEvent::new("f1", "88", dec!(100), dec!(2), 1_002), dec!(0));
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert!(order.remaining_amount().is_zero());
    }

    #[test]
    fn test_bind_exchange_order_id_once() {
        let mut order = order();
        assert!(order.bind_exchange_order_id("88"));
        assert!(!order.bind_exchange_order_id("99"));
        assert_eq!(order.exchange_order_id.as_deref(), Some("88"));
    }
}
