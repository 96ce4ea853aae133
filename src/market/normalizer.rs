//! Market data normalizer.
//!
//! Translates raw order book, trade and funding payloads into the typed
//! events of [`super::types`]. Messages whose market cannot be mapped to a
//! configured trading pair are dropped without error.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};

use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use tracing::{debug, warn};

use super::symbols::SymbolMap;
use super::types::{
    BookLevel, FundingInfo, FundingPayment, OrderBookDiff, OrderBookSnapshot, TradeEvent,
    TradeSide,
};
use crate::Decimal;
use crate::types::error::ConnectorResult;
use crate::types::time::SharedClock;
use crate::wire::{
    self, WireBook, WireFrame, WireFunding, WireFundingPayment, WireLevel, WireMarketPrice,
    WireSnapshot, WireTrade,
};

/// Default number of levels kept per side.
pub const DEFAULT_ORDER_BOOK_DEPTH: usize = 100;

const MILLIS_THRESHOLD: u64 = 1_000_000_000_000;

/// Stateless translation plus a per-pair update cursor.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use decibel_perp_rs::dec;
/// use decibel_perp_rs::market::{MarketDataNormalizer, SymbolMap};
/// use decibel_perp_rs::types::ManualClock;
/// use serde_json::json;
///
/// let normalizer = MarketDataNormalizer::new(
///     SymbolMap::identity(["BTC-USD"]),
///     100,
///     Arc::new(ManualClock::new(0)),
/// );
///
/// let raw = json!({
///     "timestamp": 1_700_000_000_000u64,
///     "data": {"bids": [["50000.0", "1.5"]], "asks": [["50001.0", "2.0"]]}
/// });
/// let snapshot = normalizer.snapshot("BTC-USD", &raw).unwrap();
/// assert_eq!(snapshot.update_id, 1_700_000_000_000);
/// assert_eq!(snapshot.bids[0].price, dec!(50000.0));
/// ```
pub struct MarketDataNormalizer {
    symbols: RwLock<SymbolMap>,
    depth: usize,
    clock: SharedClock,
    cursors: Mutex<HashMap<String, u64>>,
}

impl MarketDataNormalizer {
    /// Creates a normalizer. A depth of zero falls back to the default.
    #[must_use]
    pub fn new(symbols: SymbolMap, depth: usize, clock: SharedClock) -> Self {
        let depth = if depth == 0 {
            DEFAULT_ORDER_BOOK_DEPTH
        } else {
            depth
        };
        Self {
            symbols: RwLock::new(symbols),
            depth,
            clock,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the symbol map.
    pub fn set_symbols(&self, symbols: SymbolMap) {
        *self.symbols.write().unwrap_or_else(PoisonError::into_inner) = symbols;
    }

    /// Copy of the current symbol map.
    #[must_use]
    pub fn symbols(&self) -> SymbolMap {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Trading pair for an exchange symbol.
    #[must_use]
    pub fn trading_pair(&self, symbol: &str) -> Option<String> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .trading_pair(symbol)
            .map(str::to_string)
    }

    /// Exchange symbol for a trading pair.
    #[must_use]
    pub fn exchange_symbol(&self, trading_pair: &str) -> Option<String> {
        self.symbols
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .exchange_symbol(trading_pair)
            .map(str::to_string)
    }

    /// Highest update id routed for a pair.
    #[must_use]
    pub fn cursor(&self, trading_pair: &str) -> Option<u64> {
        self.cursors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(trading_pair)
            .copied()
    }

    /// Advances the cursor. Returns false if `update_id` is older than it.
    fn advance_cursor(&self, trading_pair: &str, update_id: u64) -> bool {
        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(trading_pair.to_string()).or_insert(0);
        if update_id < *cursor {
            return false;
        }
        *cursor = update_id;
        true
    }

    fn levels(&self, levels: Vec<WireLevel>) -> Vec<BookLevel> {
        levels
            .into_iter()
            .take(self.depth)
            .map(|WireLevel(price, size)| BookLevel::new(price, size))
            .collect()
    }

    /// Resolves the trading pair of a push frame.
    fn frame_pair(&self, frame: &WireFrame) -> Option<String> {
        let symbol = frame.symbol().unwrap_or_default();
        let pair = self.trading_pair(&symbol);
        if pair.is_none() {
            debug!(symbol = %symbol, channel = %frame.channel, "dropping message for unmapped market");
        }
        pair
    }

    /// Parses a REST order book snapshot.
    ///
    /// A missing timestamp defaults to the local clock. The snapshot always
    /// becomes the new cursor base for the pair.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if a level is malformed.
    pub fn snapshot(&self, trading_pair: &str, raw: &Value) -> ConnectorResult<OrderBookSnapshot> {
        let snapshot: WireSnapshot = serde_json::from_value(raw.clone())?;
        let book = snapshot.into_book();
        let timestamp_ms = book.timestamp.unwrap_or_else(|| self.clock.now_ms());

        let mut cursors = self.cursors.lock().unwrap_or_else(PoisonError::into_inner);
        let cursor = cursors.entry(trading_pair.to_string()).or_insert(0);
        *cursor = (*cursor).max(timestamp_ms);
        drop(cursors);

        Ok(OrderBookSnapshot {
            trading_pair: trading_pair.to_string(),
            update_id: timestamp_ms,
            timestamp_ms,
            bids: self.levels(book.bids),
            asks: self.levels(book.asks),
        })
    }

    /// Parses an order book push frame.
    ///
    /// Returns `None` for unmapped markets, malformed levels, and diffs
    /// strictly older than the pair's cursor.
    #[must_use]
    pub fn diff(&self, raw: &Value) -> Option<OrderBookDiff> {
        let frame: WireFrame = serde_json::from_value(raw.clone()).ok()?;
        let trading_pair = self.frame_pair(&frame)?;

        let book: WireBook = match serde_json::from_value(frame.data) {
            Ok(book) => book,
            Err(err) => {
                warn!(trading_pair = %trading_pair, error = %err, "dropping malformed order book diff");
                return None;
            }
        };

        // Wall-clock millisecond timestamps serve as update ids.
        let update_id = book.timestamp.unwrap_or_else(|| self.clock.now_ms());
        if !self.advance_cursor(&trading_pair, update_id) {
            debug!(trading_pair = %trading_pair, update_id, "dropping stale order book diff");
            return None;
        }

        Some(OrderBookDiff {
            trading_pair,
            update_id,
            timestamp_ms: update_id,
            bids: self.levels(book.bids),
            asks: self.levels(book.asks),
        })
    }

    /// Parses a trades push frame; `data` may hold one trade or a list.
    #[must_use]
    pub fn trades(&self, raw: &Value) -> Vec<TradeEvent> {
        let Ok(frame) = serde_json::from_value::<WireFrame>(raw.clone()) else {
            return Vec::new();
        };
        let Some(trading_pair) = self.frame_pair(&frame) else {
            return Vec::new();
        };

        let trades: Vec<WireTrade> = match wire::decode_list(&frame.data) {
            Ok(trades) => trades,
            Err(err) => {
                warn!(trading_pair = %trading_pair, error = %err, "dropping malformed trades");
                return Vec::new();
            }
        };

        trades
            .into_iter()
            .map(|trade| {
                let now = self.clock.now_ms();
                let timestamp_ms = trade.timestamp.unwrap_or(now);
                TradeEvent {
                    trading_pair: trading_pair.clone(),
                    trade_id: trade.id.unwrap_or_else(|| now.to_string()),
                    side: TradeSide::from_exchange(trade.side.as_deref().unwrap_or_default()),
                    price: trade.price.unwrap_or_default(),
                    amount: trade.size.unwrap_or_default(),
                    update_id: timestamp_ms,
                    timestamp_ms,
                }
            })
            .collect()
    }

    /// Parses a funding push frame.
    #[must_use]
    pub fn funding_update(&self, raw: &Value) -> Option<FundingInfo> {
        let frame: WireFrame = serde_json::from_value(raw.clone()).ok()?;
        let trading_pair = self.frame_pair(&frame)?;
        match serde_json::from_value::<WireFunding>(frame.data) {
            Ok(funding) => Some(funding_info(trading_pair, funding)),
            Err(err) => {
                warn!(trading_pair = %trading_pair, error = %err, "dropping malformed funding update");
                None
            }
        }
    }

    /// Parses the REST funding endpoint response.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the payload is not an object.
    pub fn funding_info(&self, trading_pair: &str, raw: &Value) -> ConnectorResult<FundingInfo> {
        let funding: WireFunding = wire::decode(raw)?;
        Ok(funding_info(trading_pair.to_string(), funding))
    }

    /// Parses the market prices endpoint, keeping only the requested pairs.
    ///
    /// The mark price is preferred over the last price.
    #[must_use]
    pub fn last_traded_prices(&self, raw: &Value, trading_pairs: &[String]) -> HashMap<String, Decimal> {
        let prices: Vec<WireMarketPrice> = match wire::decode_list(raw) {
            Ok(prices) => prices,
            Err(err) => {
                warn!(error = %err, "dropping malformed market prices");
                return HashMap::new();
            }
        };

        prices
            .into_iter()
            .filter_map(|entry| {
                let pair = self.trading_pair(entry.market.as_deref()?)?;
                if !trading_pairs.contains(&pair) {
                    return None;
                }
                let price = entry.mark_price.or(entry.price).unwrap_or_default();
                Some((pair, price))
            })
            .collect()
    }
}

impl std::fmt::Debug for MarketDataNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataNormalizer")
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

fn funding_info(trading_pair: String, funding: WireFunding) -> FundingInfo {
    FundingInfo {
        trading_pair,
        index_price: funding.index_price.unwrap_or_default(),
        mark_price: funding.mark_price.unwrap_or_default(),
        next_funding_ts_secs: funding.next_funding_time.unwrap_or(0) / 1000,
        rate: funding.funding_rate.unwrap_or_default(),
    }
}

/// Parses the funding history response into the latest payment.
///
/// Returns zeros when the history is empty. Payment times below 10^12 are
/// read as seconds.
///
/// # Errors
///
/// Returns `Decode` if the payload is not a list of payments.
pub fn last_funding_payment(raw: &Value) -> ConnectorResult<FundingPayment> {
    let payments: Vec<WireFundingPayment> = wire::decode_list(raw)?;
    let Some(latest) = payments.into_iter().next() else {
        return Ok(FundingPayment::default());
    };

    let time = latest.time.unwrap_or_default();
    let millis = if time < Decimal::from(MILLIS_THRESHOLD) {
        time * Decimal::ONE_THOUSAND
    } else {
        time
    };
    let timestamp_ms = millis.trunc().to_u64().unwrap_or(0);

    Ok(FundingPayment {
        timestamp_ms,
        rate: latest.rate.unwrap_or_default(),
        payment: latest.payment.unwrap_or_default(),
    })
}
