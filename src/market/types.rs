//! Normalized market data types.

use crate::Decimal;

/// Aggressor side of a public trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TradeSide {
    /// Buyer was the taker.
    Buy,
    /// Seller was the taker.
    Sell,
}

impl TradeSide {
    /// Maps an exchange side string. Anything other than `buy` reads as `Sell`.
    #[must_use]
    pub fn from_exchange(side: &str) -> Self {
        if side.eq_ignore_ascii_case("buy") {
            Self::Buy
        } else {
            Self::Sell
        }
    }

    /// Numeric trade type expected by engines: 1 for buy, 2 for sell.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::Buy => 1,
            Self::Sell => 2,
        }
    }
}

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    /// Price.
    pub price: Decimal,
    /// Base amount at this price.
    pub size: Decimal,
}

impl BookLevel {
    /// Creates a level.
    #[must_use]
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Full order book snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookSnapshot {
    /// Trading pair.
    pub trading_pair: String,
    /// Update id (snapshot timestamp in milliseconds).
    pub update_id: u64,
    /// Snapshot timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Bids, best first.
    pub bids: Vec<BookLevel>,
    /// Asks, best first.
    pub asks: Vec<BookLevel>,
}

impl OrderBookSnapshot {
    /// Best bid, if any.
    #[must_use]
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids.first().copied()
    }

    /// Best ask, if any.
    #[must_use]
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks.first().copied()
    }

    /// Mid price when both sides are present.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.price + ask.price) / Decimal::TWO)
    }
}

/// Incremental order book update. A zero size removes the level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBookDiff {
    /// Trading pair.
    pub trading_pair: String,
    /// Update id (event timestamp in milliseconds).
    pub update_id: u64,
    /// Event timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Changed bid levels.
    pub bids: Vec<BookLevel>,
    /// Changed ask levels.
    pub asks: Vec<BookLevel>,
}

/// Public trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeEvent {
    /// Trading pair.
    pub trading_pair: String,
    /// Exchange trade id.
    pub trade_id: String,
    /// Aggressor side.
    pub side: TradeSide,
    /// Price.
    pub price: Decimal,
    /// Base amount.
    pub amount: Decimal,
    /// Update id (trade timestamp in milliseconds).
    pub update_id: u64,
    /// Trade timestamp in milliseconds.
    pub timestamp_ms: u64,
}

/// Funding state for a perpetual market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingInfo {
    /// Trading pair.
    pub trading_pair: String,
    /// Index price.
    pub index_price: Decimal,
    /// Mark price.
    pub mark_price: Decimal,
    /// Next funding time in seconds since the epoch.
    pub next_funding_ts_secs: u64,
    /// Current funding rate.
    pub rate: Decimal,
}

/// Latest funding payment on the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FundingPayment {
    /// Payment time in milliseconds; zero when there is none.
    pub timestamp_ms: u64,
    /// Funding rate applied.
    pub rate: Decimal,
    /// Amount paid (negative) or received.
    pub payment: Decimal,
}

/// Order constraints for a trading pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingRule {
    /// Trading pair.
    pub trading_pair: String,
    /// Minimum order size.
    pub min_order_size: Decimal,
    /// Maximum order size.
    pub max_order_size: Decimal,
    /// Price tick.
    pub min_price_increment: Decimal,
    /// Size step.
    pub min_base_amount_increment: Decimal,
    /// Minimum notional.
    pub min_notional_size: Decimal,
    /// Collateral asset for both sides.
    pub collateral_token: String,
}

impl TradingRule {
    /// Rounds a price down to the tick.
    #[must_use]
    pub fn quantize_price(&self, price: Decimal) -> Decimal {
        quantize(price, self.min_price_increment)
    }

    /// Rounds an amount down to the size step.
    #[must_use]
    pub fn quantize_amount(&self, amount: Decimal) -> Decimal {
        quantize(amount, self.min_base_amount_increment)
    }
}

fn quantize(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    (value / step).floor() * step
}
