//! Market data normalization and routing.
//!
//! # Overview
//!
//! - [`MarketDataNormalizer`] turns raw snapshots, diffs, trades and funding
//!   payloads into typed events, resolving exchange symbols through a
//!   [`SymbolMap`] and dropping diffs older than the per-pair cursor.
//! - [`MarketDataRouter`] classifies push frames by channel and feeds the
//!   per-kind queues the engine consumes.
//! - [`trading_rules`] and [`is_market_active`] read market metadata.

/// Normalizer and funding payment parsing.
pub mod normalizer;

/// Channel classification and queues.
pub mod router;

/// Symbol map and trading rules.
pub mod symbols;

/// Normalized market data types.
pub mod types;

pub use normalizer::{DEFAULT_ORDER_BOOK_DEPTH, MarketDataNormalizer, last_funding_payment};
pub use router::{MarketDataQueues, MarketDataRouter, RouteOutcome};
pub use symbols::{SymbolMap, is_market_active, trading_rules};
pub use types::{
    BookLevel, FundingInfo, FundingPayment, OrderBookDiff, OrderBookSnapshot,
    TradeEvent, TradeSide, TradingRule,
};
