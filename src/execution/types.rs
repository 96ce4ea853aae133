//! Order, fill, position and balance types.

use crate::Decimal;
use crate::wire::{WireFill, WireOrder};

use super::status::OrderState;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderSide {
    /// Exchange representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    /// Limit order.
    Limit,
    /// Post-only limit order.
    LimitMaker,
    /// Market order.
    Market,
}

impl OrderType {
    /// Returns true for limit and limit-maker orders.
    #[must_use]
    pub fn is_limit(&self) -> bool {
        matches!(self, Self::Limit | Self::LimitMaker)
    }

    /// Exchange representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        if self.is_limit() { "limit" } else { "market" }
    }
}

/// Whether an order opens or reduces a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PositionAction {
    /// Opens or increases a position.
    #[default]
    Open,
    /// Reduces or closes a position; sent as reduce-only.
    Close,
}

/// An order about to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    /// Client order id.
    pub client_order_id: String,
    /// Trading pair.
    pub trading_pair: String,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<Decimal>,
    /// Base amount.
    pub amount: Decimal,
    /// Position action.
    pub position_action: PositionAction,
}

impl NewOrder {
    /// Creates an order with [`PositionAction::Open`].
    #[must_use]
    pub fn new(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        amount: Decimal,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            trading_pair: trading_pair.into(),
            side,
            order_type,
            price,
            amount,
            position_action: PositionAction::Open,
        }
    }

    /// Limit buy.
    #[must_use]
    pub fn limit_buy(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        price: Decimal,
        amount: Decimal,
    ) -> Self {
        Self::new(client_order_id, trading_pair, OrderSide::Buy, OrderType::Limit, Some(price), amount)
    }

    /// Limit sell.
    #[must_use]
    pub fn limit_sell(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        price: Decimal,
        amount: Decimal,
    ) -> Self {
        Self::new(client_order_id, trading_pair, OrderSide::Sell, OrderType::Limit, Some(price), amount)
    }

    /// Market buy.
    #[must_use]
    pub fn market_buy(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self::new(client_order_id, trading_pair, OrderSide::Buy, OrderType::Market, None, amount)
    }

    /// Market sell.
    #[must_use]
    pub fn market_sell(
        client_order_id: impl Into<String>,
        trading_pair: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self::new(client_order_id, trading_pair, OrderSide::Sell, OrderType::Market, None, amount)
    }

    /// Makes the order post-only.
    #[must_use]
    pub fn post_only(mut self) -> Self {
        self.order_type = OrderType::LimitMaker;
        self
    }

    /// Sets the position action.
    #[must_use]
    pub fn with_position_action(mut self, action: PositionAction) -> Self {
        self.position_action = action;
        self
    }

    /// Returns true if the order is reduce-only.
    #[must_use]
    pub fn is_reduce_only(&self) -> bool {
        self.position_action == PositionAction::Close
    }
}

/// An order status observation from push or poll, before status mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderEvent {
    /// Client order id, if the source carries one.
    pub client_order_id: Option<String>,
    /// Exchange order id, if the source carries one.
    pub exchange_order_id: Option<String>,
    /// Raw exchange status.
    pub status: String,
    /// Exchange update time in milliseconds.
    pub timestamp_ms: u64,
}

impl OrderEvent {
    /// Creates an event with no identifiers.
    #[must_use]
    pub fn new(status: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            client_order_id: None,
            exchange_order_id: None,
            status: status.into(),
            timestamp_ms,
        }
    }

    /// Sets the client order id.
    #[must_use]
    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    /// Sets the exchange order id.
    #[must_use]
    pub fn with_exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }

    /// Builds an event from a decoded payload, using `fallback_ts` when the
    /// payload carries no update time.
    #[must_use]
    pub fn from_wire(order: WireOrder, fallback_ts: u64) -> Self {
        Self {
            client_order_id: order.client_id,
            exchange_order_id: order.id,
            status: order.status.unwrap_or_default(),
            timestamp_ms: order.updated_at.unwrap_or(fallback_ts),
        }
    }
}

/// A state change addressed to a tracked order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    /// Client order id.
    pub client_order_id: String,
    /// Exchange order id to bind, if known.
    pub exchange_order_id: Option<String>,
    /// Candidate state.
    pub new_state: OrderState,
    /// Update time in milliseconds.
    pub timestamp_ms: u64,
}

impl OrderUpdate {
    /// Creates an update.
    #[must_use]
    pub fn new(client_order_id: impl Into<String>, new_state: OrderState, timestamp_ms: u64) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            exchange_order_id: None,
            new_state,
            timestamp_ms,
        }
    }

    /// Sets the exchange order id.
    #[must_use]
    pub fn with_exchange_order_id(mut self, id: impl Into<String>) -> Self {
        self.exchange_order_id = Some(id.into());
        self
    }
}

/// A fill report from push or poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillEvent {
    /// Exchange fill id, the dedup key.
    pub fill_id: String,
    /// Exchange order id.
    pub exchange_order_id: String,
    /// Fill price.
    pub price: Decimal,
    /// Base amount.
    pub amount: Decimal,
    /// Fee reported by the exchange.
    pub reported_fee: Decimal,
    /// Fill time in milliseconds.
    pub timestamp_ms: u64,
}

impl FillEvent {
    /// Creates a fill with no reported fee.
    #[must_use]
    pub fn new(
        fill_id: impl Into<String>,
        exchange_order_id: impl Into<String>,
        price: Decimal,
        amount: Decimal,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            fill_id: fill_id.into(),
            exchange_order_id: exchange_order_id.into(),
            price,
            amount,
            reported_fee: Decimal::ZERO,
            timestamp_ms,
        }
    }

    /// Sets the reported fee.
    #[must_use]
    pub fn with_reported_fee(mut self, fee: Decimal) -> Self {
        self.reported_fee = fee;
        self
    }

    /// Builds a fill from a decoded payload.
    ///
    /// Returns `None` if the id, order id, price or size is missing.
    #[must_use]
    pub fn from_wire(fill: WireFill, fallback_ts: u64) -> Option<Self> {
        Some(Self {
            fill_id: fill.id?,
            exchange_order_id: fill.order_id?,
            price: fill.price?,
            amount: fill.size?,
            reported_fee: fill.fee.unwrap_or_default(),
            timestamp_ms: fill.created_at.unwrap_or(fallback_ts),
        })
    }

    /// Quote amount, `price * amount`.
    #[must_use]
    pub fn quote_amount(&self) -> Decimal {
        self.price * self.amount
    }
}

/// A recorded fill with its computed fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeFill {
    /// Exchange fill id.
    pub fill_id: String,
    /// Client order id.
    pub client_order_id: String,
    /// Exchange order id.
    pub exchange_order_id: String,
    /// Trading pair.
    pub trading_pair: String,
    /// Order side.
    pub side: OrderSide,
    /// Fill price.
    pub price: Decimal,
    /// Base amount.
    pub base_amount: Decimal,
    /// Quote amount.
    pub quote_amount: Decimal,
    /// Fee charged, in `fee_asset`.
    pub fee: Decimal,
    /// Fee asset (the quote asset).
    pub fee_asset: String,
    /// Fee reported by the exchange.
    pub reported_fee: Decimal,
    /// Whether the maker rate was applied.
    pub is_maker: bool,
    /// Fill time in milliseconds.
    pub timestamp_ms: u64,
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionSide {
    /// Long.
    Long,
    /// Short.
    Short,
}

impl PositionSide {
    /// Reads `long`/`buy` and `short`/`sell`, case-insensitively.
    #[must_use]
    pub fn from_exchange(side: &str) -> Option<Self> {
        match side.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Some(Self::Long),
            "short" | "sell" => Some(Self::Short),
            _ => None,
        }
    }
}

/// Position table key: `(pair, Some(side))` in hedge mode, `(pair, None)` in
/// one-way mode.
pub type PositionKey = (String, Option<PositionSide>);

/// An open position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Trading pair.
    pub trading_pair: String,
    /// Direction.
    pub side: PositionSide,
    /// Absolute size.
    pub amount: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Decimal,
    /// Leverage.
    pub leverage: Decimal,
}

impl Position {
    /// Size with sign: positive long, negative short.
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            PositionSide::Long => self.amount,
            PositionSide::Short => -self.amount,
        }
    }
}

/// Balance of one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    /// Total balance.
    pub total: Decimal,
    /// Available balance.
    pub available: Decimal,
}
