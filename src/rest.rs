//! Typed REST client over the [`RestTransport`] collaborator.
//!
//! Each method builds one [`RestRequest`], hands it to the transport and
//! decodes the response. Payloads that feed the normalizer or the reconciler
//! directly (books, positions, balances) are returned raw so that decoding
//! happens once, next to the state they mutate.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::constants::{
    ACCOUNT_OVERVIEW_PATH_URL, ACCOUNT_POSITIONS_PATH_URL, CANCEL_ORDER_PATH_URL,
    CREATE_ORDER_PATH_URL, FILLS_PATH_URL, FUNDING_HISTORY_PATH_URL, FUNDING_INFO_PATH_URL,
    MARKET_PRICES_PATH_URL, MARKETS_PATH_URL, OPEN_ORDERS_PATH_URL, ORDER_BOOK_PATH_URL,
    ORDER_STATUS_PATH_URL, SERVER_TIME_PATH_URL, SET_LEVERAGE_PATH_URL,
};
use crate::execution::{NewOrder, OrderType};
use crate::transport::{RestRequest, RestTransport};
use crate::types::error::{ConnectorError, ConnectorResult};
use crate::wire::{self, WireFill, WireOrder, WireServerTime};

/// Exchange acknowledgement of a created order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderAck {
    /// Exchange order id.
    pub exchange_order_id: String,
    /// Creation time in milliseconds, if reported.
    pub created_at_ms: Option<u64>,
}

/// JSON body of a create-order request.
///
/// `price` is sent for limit orders only and `postOnly` for limit-maker
/// orders only.
#[must_use]
pub fn order_body(order: &NewOrder, exchange_symbol: &str) -> Value {
    let mut body = json!({
        "market": exchange_symbol,
        "side": order.side.as_str(),
        "type": order.order_type.as_str(),
        "size": order.amount.to_string(),
        "clientId": order.client_order_id,
        "reduceOnly": order.is_reduce_only(),
    });
    if order.order_type.is_limit() {
        if let Some(price) = order.price {
            body["price"] = json!(price.to_string());
        }
    }
    if order.order_type == OrderType::LimitMaker {
        body["postOnly"] = json!(true);
    }
    body
}

fn order_path(template: &str, exchange_order_id: &str) -> String {
    template.replace("{order_id}", exchange_order_id)
}

fn market_path(template: &str, exchange_symbol: &str) -> String {
    template.replace("{market_name}", exchange_symbol)
}

/// REST client for the exchange.
#[derive(Clone)]
pub struct RestClient {
    transport: Arc<dyn RestTransport>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient").finish_non_exhaustive()
    }
}

impl RestClient {
    /// Creates a client over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self { transport }
    }

    async fn execute(&self, request: RestRequest) -> ConnectorResult<Value> {
        debug!(method = %request.method, path = %request.path, "rest request");
        self.transport.execute(request).await
    }

    // Public endpoints

    /// Market list.
    pub async fn markets(&self) -> ConnectorResult<Value> {
        self.execute(RestRequest::get(MARKETS_PATH_URL, MARKETS_PATH_URL))
            .await
    }

    /// Order book snapshot limited to `depth` levels per side.
    pub async fn order_book(&self, exchange_symbol: &str, depth: usize) -> ConnectorResult<Value> {
        let request = RestRequest::get(
            market_path(ORDER_BOOK_PATH_URL, exchange_symbol),
            ORDER_BOOK_PATH_URL,
        )
        .with_param("depth", depth.to_string());
        self.execute(request).await
    }

    /// Current funding state of a market.
    pub async fn funding_info(&self, exchange_symbol: &str) -> ConnectorResult<Value> {
        self.execute(RestRequest::get(
            market_path(FUNDING_INFO_PATH_URL, exchange_symbol),
            FUNDING_INFO_PATH_URL,
        ))
        .await
    }

    /// Mark and last prices of every market.
    pub async fn market_prices(&self) -> ConnectorResult<Value> {
        self.execute(RestRequest::get(MARKET_PRICES_PATH_URL, MARKET_PRICES_PATH_URL))
            .await
    }

    /// Server time in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the response carries no time.
    pub async fn server_time(&self) -> ConnectorResult<u64> {
        let raw = self
            .execute(RestRequest::get(SERVER_TIME_PATH_URL, MARKETS_PATH_URL))
            .await?;
        let time: WireServerTime = wire::decode(&raw)?;
        time.server_time
            .ok_or_else(|| ConnectorError::Decode("server time response carried no time".to_string()))
    }

    // Private endpoints

    /// Submits an order.
    ///
    /// # Errors
    ///
    /// Returns `Decode` if the response carries no order id.
    pub async fn create_order(&self, order: &NewOrder, exchange_symbol: &str) -> ConnectorResult<OrderAck> {
        let request = RestRequest::post(CREATE_ORDER_PATH_URL, CREATE_ORDER_PATH_URL)
            .with_body(order_body(order, exchange_symbol))
            .authenticated();
        let raw = self.execute(request).await?;
        let ack: WireOrder = wire::decode(&raw)?;
        let exchange_order_id = ack
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConnectorError::Decode("create response carried no order id".to_string()))?;
        Ok(OrderAck {
            exchange_order_id,
            created_at_ms: ack.created_at,
        })
    }

    /// Cancels an order by exchange id.
    pub async fn cancel_order(&self, exchange_order_id: &str) -> ConnectorResult<()> {
        let request = RestRequest::delete(
            order_path(CANCEL_ORDER_PATH_URL, exchange_order_id),
            CANCEL_ORDER_PATH_URL,
        )
        .authenticated();
        self.execute(request).await.map(|_| ())
    }

    /// Current state of one order.
    pub async fn order_status(&self, exchange_order_id: &str) -> ConnectorResult<WireOrder> {
        let request = RestRequest::get(
            order_path(ORDER_STATUS_PATH_URL, exchange_order_id),
            OPEN_ORDERS_PATH_URL,
        )
        .authenticated();
        let raw = self.execute(request).await?;
        wire::decode(&raw)
    }

    /// Fills of one order.
    pub async fn fills(&self, exchange_order_id: &str) -> ConnectorResult<Vec<WireFill>> {
        let request = RestRequest::get(FILLS_PATH_URL, FILLS_PATH_URL)
            .with_param("orderId", exchange_order_id)
            .authenticated();
        let raw = self.execute(request).await?;
        wire::decode_list(&raw)
    }

    /// Open positions.
    pub async fn positions(&self) -> ConnectorResult<Value> {
        self.execute(
            RestRequest::get(ACCOUNT_POSITIONS_PATH_URL, ACCOUNT_POSITIONS_PATH_URL).authenticated(),
        )
        .await
    }

    /// Account overview with collateral and balances.
    pub async fn account_overview(&self) -> ConnectorResult<Value> {
        self.execute(
            RestRequest::get(ACCOUNT_OVERVIEW_PATH_URL, ACCOUNT_OVERVIEW_PATH_URL).authenticated(),
        )
        .await
    }

    /// Latest funding payment of a market.
    pub async fn funding_history(&self, exchange_symbol: &str) -> ConnectorResult<Value> {
        let request = RestRequest::get(FUNDING_HISTORY_PATH_URL, FILLS_PATH_URL)
            .with_param("market", exchange_symbol)
            .with_param("limit", "1")
            .authenticated();
        self.execute(request).await
    }

    /// Sets leverage on a market.
    pub async fn set_leverage(&self, exchange_symbol: &str, leverage: u32) -> ConnectorResult<()> {
        let request = RestRequest::post(SET_LEVERAGE_PATH_URL, ACCOUNT_OVERVIEW_PATH_URL)
            .with_body(json!({"market": exchange_symbol, "leverage": leverage}))
            .authenticated();
        self.execute(request).await.map(|_| ())
    }
}
