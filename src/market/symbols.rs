//! Exchange symbol mapping and trading rules.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::types::TradingRule;
use crate::Decimal;
use crate::types::error::ConnectorResult;
use crate::wire::{self, WireMarket};

const DEFAULT_QUOTE: &str = "USD";

/// Bidirectional map between exchange symbols and `BASE-QUOTE` trading pairs.
///
/// # Example
///
/// ```rust
/// use decibel_perp_rs::market::SymbolMap;
///
/// let symbols = SymbolMap::from_pairs([("BTC-PERP", "BTC-USD")]);
/// assert_eq!(symbols.trading_pair("BTC-PERP"), Some("BTC-USD"));
/// assert_eq!(symbols.exchange_symbol("BTC-USD"), Some("BTC-PERP"));
/// assert_eq!(symbols.trading_pair("DOGE-PERP"), None);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolMap {
    to_pair: HashMap<String, String>,
    to_symbol: HashMap<String, String>,
}

impl SymbolMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a map from `(exchange symbol, trading pair)` entries.
    pub fn from_pairs<I, S, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<String>,
    {
        let mut map = Self::new();
        for (symbol, pair) in entries {
            map.insert(symbol, pair);
        }
        map
    }

    /// Creates an identity map where the symbol equals the trading pair.
    pub fn identity<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_pairs(pairs.into_iter().map(|pair| {
            let pair = pair.into();
            (pair.clone(), pair)
        }))
    }

    /// Builds the map from the markets endpoint response.
    ///
    /// The base asset is `baseCurrency`, falling back to the symbol prefix
    /// before `-`; the quote asset is `quoteCurrency`, falling back to `USD`.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the response is not a market list.
    pub fn from_markets(raw: &Value) -> ConnectorResult<Self> {
        let markets: Vec<WireMarket> = wire::decode(raw)?;
        let mut map = Self::new();
        for market in &markets {
            let Some(symbol) = market.name.as_deref() else {
                continue;
            };
            let base = market
                .base_currency
                .clone()
                .unwrap_or_else(|| symbol.split('-').next().unwrap_or(symbol).to_string());
            let quote = market
                .quote_currency
                .clone()
                .unwrap_or_else(|| DEFAULT_QUOTE.to_string());
            map.insert(symbol, format!("{base}-{quote}"));
        }
        debug!(markets = map.len(), "symbol map built");
        Ok(map)
    }

    /// Adds a mapping, replacing any previous entry for either key.
    pub fn insert(&mut self, symbol: impl Into<String>, trading_pair: impl Into<String>) {
        let symbol = symbol.into();
        let trading_pair = trading_pair.into();
        self.to_symbol.insert(trading_pair.clone(), symbol.clone());
        self.to_pair.insert(symbol, trading_pair);
    }

    /// Trading pair for an exchange symbol.
    #[must_use]
    pub fn trading_pair(&self, symbol: &str) -> Option<&str> {
        self.to_pair.get(symbol).map(String::as_str)
    }

    /// Exchange symbol for a trading pair.
    #[must_use]
    pub fn exchange_symbol(&self, trading_pair: &str) -> Option<&str> {
        self.to_symbol.get(trading_pair).map(String::as_str)
    }

    /// Number of mapped markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_pair.len()
    }

    /// Returns true if no market is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_pair.is_empty()
    }
}

/// Returns true if the market accepts orders.
#[must_use]
pub fn is_market_active(market: &WireMarket) -> bool {
    market.status.as_deref().is_some_and(|status| {
        ["active", "online", "trading"]
            .iter()
            .any(|accepted| status.eq_ignore_ascii_case(accepted))
    })
}

/// Parses trading rules from the markets endpoint response.
///
/// Markets whose symbol is not in `symbols` are skipped with a warning.
/// Missing constraints fall back to the exchange's documented defaults.
///
/// # Errors
///
/// Returns `Decode` if the response is not a market list.
pub fn trading_rules(raw: &Value, symbols: &SymbolMap) -> ConnectorResult<Vec<TradingRule>> {
    let markets: Vec<WireMarket> = wire::decode(raw)?;
    let mut rules = Vec::with_capacity(markets.len());

    for market in markets {
        let symbol = market.name.clone().unwrap_or_default();
        let Some(trading_pair) = symbols.trading_pair(&symbol) else {
            warn!(symbol = %symbol, "skipping trading rule for unmapped market");
            continue;
        };

        rules.push(TradingRule {
            trading_pair: trading_pair.to_string(),
            min_order_size: market.min_order_size.unwrap_or(Decimal::new(1, 3)),
            max_order_size: market.max_order_size.unwrap_or(Decimal::from(1_000_000)),
            min_price_increment: market.price_increment.unwrap_or(Decimal::new(1, 2)),
            min_base_amount_increment: market.size_increment.unwrap_or(Decimal::new(1, 3)),
            min_notional_size: market.min_notional.unwrap_or(Decimal::TEN),
            collateral_token: market
                .quote_currency
                .unwrap_or_else(|| DEFAULT_QUOTE.to_string()),
        });
    }

    Ok(rules)
}
