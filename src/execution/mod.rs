//! Order and account reconciliation core.
//!
//! Three sources report on the same orders: WebSocket push events, REST
//! polling, and REST responses to actions the connector itself took. They
//! arrive in any order, overlap and sometimes disagree. This module merges
//! them into one authoritative view.
//!
//! # Overview
//!
//! - **Order types**: [`NewOrder`], [`OrderEvent`], [`OrderUpdate`], [`FillEvent`]
//! - **State**: [`OrderState`] and its transition lattice, [`TrackedOrder`]
//! - **Storage**: [`OrderTable`] with per-order locks, [`AccountBook`] with
//!   copy-on-write position and balance snapshots
//! - **Events**: [`ConnectorEvent`] published on an [`EventBus`]
//! - **Entry point**: [`Reconciler`]
//!
//! # Ordering rules
//!
//! Terminal states (`Filled`, `Cancelled`, `Failed`) absorb every later
//! update. A non-terminal update older than the order's last update is
//! stale; an older terminal update still applies if the lattice allows it.
//! At equal timestamps a terminal candidate wins. Fills are deduplicated by fill id
//! and only ever add to the cumulative amounts.

/// Position and balance tables.
pub mod account;

/// Events published to the trading engine.
pub mod events;

/// Tracked order and its mutation rules.
pub mod order;

/// The reconciler.
pub mod reconciler;

/// Order states and the transition lattice.
pub mod status;

/// Order table.
pub mod table;

/// Order, fill, position and balance types.
pub mod types;

pub use account::{AccountBook, BalanceTable, PositionTable, PositionsReport, position_key};
pub use events::{ConnectorEvent, DEFAULT_EVENT_CAPACITY, EventBus, FaultSource, OrderUpdateEvent};
pub use order::{FillOutcome, TrackedOrder, UpdateOutcome};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use status::OrderState;
pub use table::{OrderHandle, OrderTable, OrderTableStats};
pub use types::{
    Balance, FillEvent, NewOrder, OrderEvent, OrderSide, OrderType, OrderUpdate, Position,
    PositionAction, PositionKey, PositionSide, TradeFill,
};
