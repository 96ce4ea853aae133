//! # decibel-perp-rs
//!
//! Connector for the Decibel perpetual futures exchange.
//!
//! The crate bridges a generic trading engine to the exchange's REST and
//! WebSocket APIs. Its center is the order/account reconciliation core, which
//! merges three independently ordered sources of truth into one view of
//! orders, fills, positions and balances:
//!
//! - WebSocket push events (orders, fills, positions channels)
//! - REST polling (order status, balances, positions, fills fallback)
//! - REST responses to user-initiated actions (create, cancel)
//!
//! # Modules
//!
//! - [`auth`]: HMAC-SHA256 request signing and the WebSocket auth frame
//! - [`market`]: order book, trade and funding normalization
//! - [`execution`]: order table, status lattice and the [`execution::Reconciler`]
//! - [`polling`]: fixed-interval REST poller feeding the reconciler
//! - [`stream`]: supervised push listeners with reconnect backoff
//! - [`connector`]: user-initiated actions wired into the reconciler
//! - [`transport`]: the narrow traits the HTTP/WebSocket layer must implement
//!
//! # Example
//!
//! ```rust
//! use decibel_perp_rs::dec;
//! use decibel_perp_rs::execution::{
//!     NewOrder, OrderEvent, OrderState, Reconciler, ReconcilerConfig,
//! };
//!
//! let reconciler = Reconciler::new(ReconcilerConfig::default());
//!
//! reconciler
//!     .register_order(NewOrder::limit_buy("decibel-1", "BTC-USD", dec!(50000), dec!(1)), 1_000)
//!     .unwrap();
//! reconciler.process_creation_response("decibel-1", "88", 1_001).unwrap();
//!
//! let event = OrderEvent::new("filled", 1_002).with_exchange_order_id("88");
//! reconciler.apply_order_event(&event);
//!
//! let order = reconciler.order("decibel-1").unwrap();
//! assert_eq!(order.state, OrderState::Filled);
//! ```

/// Request signing and authentication frames.
pub mod auth;

/// Connector configuration.
pub mod config;

/// Exchange endpoints, channels and rate-limit table.
pub mod constants;

/// User-initiated actions wired into the reconciliation core.
pub mod connector;

/// Order and account reconciliation core.
pub mod execution;

/// Market data normalization and routing.
pub mod market;

/// Fixed-interval REST polling.
pub mod polling;

/// Typed REST client over the transport collaborator.
pub mod rest;

/// Supervised push listeners.
pub mod stream;

/// Transport collaborator traits and mocks.
pub mod transport;

/// Shared types: errors, clocks, shutdown signal.
pub mod types;

/// Boundary decoding of exchange payloads.
pub mod wire;

pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;
