//! Boundary decoding of exchange payloads.
//!
//! Every message the connector consumes is decoded here into a typed shape
//! before any state is touched. The exchange is loose about representation:
//! responses come wrapped in `{"data": ...}` or bare, numbers arrive as JSON
//! numbers or strings, and several fields have alternate names. Those
//! variations are absorbed by [`Envelope`], untagged enums, `#[serde(alias)]`
//! and the lenient field helpers in [`de`].
//!
//! Fields are optional at this layer. Consumers decide which missing fields
//! have a safe default and which make the message unusable.

use std::collections::HashMap;

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::Decimal;
use crate::types::error::ConnectorResult;

/// Lenient field deserializers.
pub mod de;

/// A payload that may be wrapped in `{"data": ...}` or sent bare.
///
/// An object carrying a `data` key is always read as wrapped.
#[derive(Debug, Clone)]
pub enum Envelope<T> {
    /// `{"data": T}`
    Wrapped {
        /// Wrapped payload.
        data: T,
    },
    /// `T`
    Bare(T),
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Envelope<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Object(mut map) if map.contains_key("data") => {
                let data = map.remove("data").unwrap_or_default();
                T::deserialize(data)
                    .map(|data| Self::Wrapped { data })
                    .map_err(D::Error::custom)
            }
            other => T::deserialize(other).map(Self::Bare).map_err(D::Error::custom),
        }
    }
}

impl<T> Envelope<T> {
    /// Unwraps the payload.
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

/// One item or a list of items.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// A list.
    Many(Vec<T>),
    /// A single item.
    One(T),
}

impl<T> OneOrMany<T> {
    /// Flattens into a list.
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![item],
        }
    }
}

/// Decodes a payload that may be wrapped in `{"data": ...}`.
///
/// # Errors
///
/// Returns `Decode` if the payload matches neither form.
pub fn decode<T: DeserializeOwned>(raw: &Value) -> ConnectorResult<T> {
    let envelope: Envelope<T> = serde_json::from_value(raw.clone())?;
    Ok(envelope.into_inner())
}

/// Decodes a payload that may be wrapped, and may be one item or a list.
///
/// # Errors
///
/// Returns `Decode` if the payload matches none of the forms.
pub fn decode_list<T: DeserializeOwned>(raw: &Value) -> ConnectorResult<Vec<T>> {
    let envelope: Envelope<OneOrMany<T>> = serde_json::from_value(raw.clone())?;
    Ok(envelope.into_inner().into_vec())
}

/// A push frame: `{channel, market?, data}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireFrame {
    /// Channel name, possibly suffixed with `.SYMBOL`.
    #[serde(default)]
    pub channel: String,
    /// Exchange symbol, when sent at the top level.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub market: Option<String>,
    /// Channel payload.
    #[serde(default)]
    pub data: Value,
}

impl WireFrame {
    /// Channel name without any `.SYMBOL` suffix.
    #[must_use]
    pub fn channel_head(&self) -> &str {
        self.channel.split('.').next().unwrap_or_default()
    }

    /// Exchange symbol from the frame, falling back to `data.market`.
    #[must_use]
    pub fn symbol(&self) -> Option<String> {
        self.market.clone().or_else(|| {
            self.data
                .get("market")
                .and_then(Value::as_str)
                .filter(|symbol| !symbol.is_empty())
                .map(str::to_string)
        })
    }
}

/// A price level, sent as `[price, size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WireLevel(
    #[serde(deserialize_with = "de::decimal")] pub Decimal,
    #[serde(deserialize_with = "de::decimal")] pub Decimal,
);

/// Book levels plus optional timestamp.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireBook {
    /// Bid levels, best first.
    #[serde(default)]
    pub bids: Vec<WireLevel>,
    /// Ask levels, best first.
    #[serde(default)]
    pub asks: Vec<WireLevel>,
    /// Event timestamp in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub timestamp: Option<u64>,
}

/// REST order book snapshot: `{timestamp, data: {bids, asks}}` or bare.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSnapshot {
    /// Snapshot timestamp in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub timestamp: Option<u64>,
    /// Levels when wrapped.
    #[serde(default)]
    pub data: Option<WireBook>,
    /// Levels when bare.
    #[serde(flatten)]
    pub inline: WireBook,
}

impl WireSnapshot {
    /// Levels and timestamp, whichever form was sent.
    #[must_use]
    pub fn into_book(self) -> WireBook {
        let mut book = self.data.unwrap_or(self.inline);
        book.timestamp = self.timestamp.or(book.timestamp);
        book
    }
}

/// Public trade.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTrade {
    /// Trade id.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub id: Option<String>,
    /// Taker side.
    #[serde(default)]
    pub side: Option<String>,
    /// Price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub price: Option<Decimal>,
    /// Base amount.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub size: Option<Decimal>,
    /// Trade time in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub timestamp: Option<u64>,
}

/// Funding state from the push channel or the REST funding endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFunding {
    /// Index price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub index_price: Option<Decimal>,
    /// Mark price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub mark_price: Option<Decimal>,
    /// Current funding rate.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub funding_rate: Option<Decimal>,
    /// Next funding time in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub next_funding_time: Option<u64>,
}

/// Order state, from the orders channel or the order status endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOrder {
    /// Client order id.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub client_id: Option<String>,
    /// Exchange order id.
    #[serde(default, alias = "orderId", deserialize_with = "de::opt_string")]
    pub id: Option<String>,
    /// Raw status string.
    #[serde(default)]
    pub status: Option<String>,
    /// Last update time in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub updated_at: Option<u64>,
    /// Creation time in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub created_at: Option<u64>,
}

/// Private fill.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFill {
    /// Fill id.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub id: Option<String>,
    /// Exchange order id.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub order_id: Option<String>,
    /// Fill price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub price: Option<Decimal>,
    /// Base amount.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub size: Option<Decimal>,
    /// Fee reported by the exchange.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub fee: Option<Decimal>,
    /// Fill time in milliseconds.
    #[serde(default, deserialize_with = "de::opt_u64")]
    pub created_at: Option<u64>,
}

/// Open position.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePosition {
    /// Exchange symbol.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub market: Option<String>,
    /// Signed position size.
    #[serde(default, alias = "size", deserialize_with = "de::opt_decimal")]
    pub net_size: Option<Decimal>,
    /// Explicit side (`long`/`short`), sent in hedge mode.
    #[serde(default)]
    pub side: Option<String>,
    /// Average entry price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub entry_price: Option<Decimal>,
    /// Unrealized profit and loss.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub unrealized_pnl: Option<Decimal>,
    /// Leverage.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub leverage: Option<Decimal>,
}

/// Collateral entry in the account overview map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCollateral {
    /// Total value.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub value: Option<Decimal>,
    /// Free collateral; defaults to `value`.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub free_collateral: Option<Decimal>,
}

/// Flat balance entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireBalanceEntry {
    /// Asset name.
    #[serde(default, alias = "asset", deserialize_with = "de::opt_string")]
    pub currency: Option<String>,
    /// Total balance.
    #[serde(default, alias = "balance", deserialize_with = "de::opt_decimal")]
    pub total: Option<Decimal>,
    /// Available balance; defaults to `total`.
    #[serde(default, alias = "availableBalance", deserialize_with = "de::opt_decimal")]
    pub free: Option<Decimal>,
}

/// Account overview sections; either, both or neither may be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireBalanceSections {
    /// `{asset: {value, freeCollateral}}`
    #[serde(default)]
    pub collateral: HashMap<String, WireCollateral>,
    /// `[{currency, total, free}]`
    #[serde(default)]
    pub balances: Vec<WireBalanceEntry>,
}

/// Every accepted balances shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireBalances {
    /// A bare list of flat entries.
    List(Vec<WireBalanceEntry>),
    /// Collateral map and/or flat list.
    Sections(WireBalanceSections),
}

/// Market metadata from the markets endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMarket {
    /// Exchange symbol.
    #[serde(default, alias = "symbol", deserialize_with = "de::opt_string")]
    pub name: Option<String>,
    /// Base asset.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub base_currency: Option<String>,
    /// Quote asset.
    #[serde(default, deserialize_with = "de::opt_string")]
    pub quote_currency: Option<String>,
    /// Trading status.
    #[serde(default)]
    pub status: Option<String>,
    /// Minimum order size.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub min_order_size: Option<Decimal>,
    /// Maximum order size.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub max_order_size: Option<Decimal>,
    /// Price tick.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub price_increment: Option<Decimal>,
    /// Size step.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub size_increment: Option<Decimal>,
    /// Minimum notional.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub min_notional: Option<Decimal>,
}

/// Entry of the market prices endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMarketPrice {
    /// Exchange symbol.
    #[serde(default, alias = "symbol", deserialize_with = "de::opt_string")]
    pub market: Option<String>,
    /// Mark price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub mark_price: Option<Decimal>,
    /// Last price.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub price: Option<Decimal>,
}

/// Funding payment history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireFundingPayment {
    /// Payment time, in seconds or milliseconds.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub time: Option<Decimal>,
    /// Funding rate applied.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub rate: Option<Decimal>,
    /// Amount paid or received.
    #[serde(default, deserialize_with = "de::opt_decimal")]
    pub payment: Option<Decimal>,
}

/// Server time response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireServerTime {
    /// Server time in milliseconds.
    #[serde(default, alias = "time", alias = "timestamp", deserialize_with = "de::opt_u64")]
    pub server_time: Option<u64>,
}

/// Login acknowledgement on the private stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireAuthAck {
    /// Whether the login was accepted.
    #[serde(default)]
    pub success: Option<bool>,
    /// Rejection reason.
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}
