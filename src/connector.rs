//! Connector façade.
//!
//! [`DecibelConnector`] owns every component and wires user-initiated actions
//! into the reconciliation core: an order is registered before its create
//! request goes out, and the REST response or failure is fed back through
//! the same entry points the push and poll paths use.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use decibel_perp_rs::config::ConnectorConfig;
//! use decibel_perp_rs::connector::DecibelConnector;
//! use decibel_perp_rs::transport::{MockRestTransport, MockWsTransport};
//! use decibel_perp_rs::types::ManualClock;
//!
//! let config = ConnectorConfig::new("key", "secret").with_trading_pairs(["BTC-USD"]);
//! let (connector, _queues) = DecibelConnector::new(
//!     config,
//!     Arc::new(MockRestTransport::new()),
//!     Arc::new(MockWsTransport::default()),
//!     Arc::new(ManualClock::new(1_700_000_000_000)),
//! )
//! .unwrap();
//!
//! let id = connector.new_client_order_id();
//! assert!(id.starts_with("decibel-"));
//! assert!(id.len() <= 36);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::Decimal;
use crate::auth::DecibelAuth;
use crate::config::ConnectorConfig;
use crate::constants::{CLIENT_ORDER_ID_MAX_LENGTH, CLIENT_ORDER_ID_PREFIX};
use crate::execution::{NewOrder, Reconciler, TrackedOrder, UpdateOutcome};
use crate::market::{
    FundingInfo, FundingPayment, MarketDataNormalizer, MarketDataQueues, MarketDataRouter,
    OrderBookSnapshot, SymbolMap, TradingRule, is_market_active, last_funding_payment,
    trading_rules,
};
use crate::polling::Poller;
use crate::rest::RestClient;
use crate::stream::{MarketStreamListener, UserStreamListener};
use crate::transport::{RestTransport, WsTransport};
use crate::types::error::{ConnectorError, ConnectorResult};
use crate::types::{Clock, SharedClock, ShutdownSignal, TimeSynchronizer};
use crate::wire::{self, WireMarket};

/// Readiness of the connector's startup steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorStatus {
    /// The symbol map has been loaded.
    pub symbols_initialized: bool,
    /// Trading rules have been loaded.
    pub trading_rules_initialized: bool,
    /// At least one balance has been reconciled, or trading is off.
    pub account_balance: bool,
}

impl ConnectorStatus {
    /// Returns true once every step is done.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.symbols_initialized && self.trading_rules_initialized && self.account_balance
    }
}

/// Handles of the background tasks started by [`DecibelConnector::start`].
#[derive(Debug)]
pub struct ConnectorTasks {
    /// REST poller, absent when trading is off.
    pub poller: Option<JoinHandle<()>>,
    /// Private stream, absent when trading is off.
    pub user_stream: Option<JoinHandle<ConnectorResult<()>>>,
    /// Public market data stream.
    pub market_stream: JoinHandle<ConnectorResult<()>>,
}

/// The Decibel perpetual connector.
pub struct DecibelConnector {
    config: ConnectorConfig,
    clock: Arc<TimeSynchronizer>,
    auth: Arc<DecibelAuth>,
    rest: RestClient,
    reconciler: Arc<Reconciler>,
    normalizer: Arc<MarketDataNormalizer>,
    router: MarketDataRouter,
    poller: Arc<Poller>,
    user_stream: Arc<UserStreamListener>,
    market_stream: Arc<MarketStreamListener>,
    trading_rules: RwLock<HashMap<String, TradingRule>>,
    order_sequence: AtomicU64,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for DecibelConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecibelConnector")
            .field("domain", &self.config.domain)
            .field("trading_pairs", &self.config.trading_pairs)
            .finish_non_exhaustive()
    }
}

impl DecibelConnector {
    /// Validates `config` and builds every component.
    ///
    /// Returns the connector and the market data queues the engine consumes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the configuration fails validation.
    pub fn new(
        config: ConnectorConfig,
        rest_transport: Arc<dyn RestTransport>,
        ws_transport: Arc<dyn WsTransport>,
        local_clock: SharedClock,
    ) -> ConnectorResult<(Self, MarketDataQueues)> {
        config.validate()?;

        let clock = Arc::new(TimeSynchronizer::new(local_clock));
        let shared_clock: SharedClock = clock.clone();
        let auth = Arc::new(DecibelAuth::new(config.credentials.clone(), Arc::clone(&shared_clock)));
        let rest = RestClient::new(rest_transport);
        let reconciler = Arc::new(Reconciler::new(config.reconciler.clone()));
        let normalizer = Arc::new(MarketDataNormalizer::new(
            SymbolMap::identity(config.trading_pairs.iter().cloned()),
            config.order_book_depth,
            Arc::clone(&shared_clock),
        ));
        let (router, queues) = MarketDataRouter::new(Arc::clone(&normalizer));

        let poller = Arc::new(Poller::new(
            config.poller.clone(),
            rest.clone(),
            Arc::clone(&reconciler),
            Arc::clone(&normalizer),
            Arc::clone(&shared_clock),
        ));
        let user_stream = Arc::new(UserStreamListener::new(
            config.stream.clone(),
            config.ws_url.clone(),
            Arc::clone(&ws_transport),
            Arc::clone(&auth),
            Arc::clone(&reconciler),
            shared_clock,
        ));
        let market_stream = Arc::new(MarketStreamListener::new(
            config.stream.clone(),
            config.ws_url.clone(),
            ws_transport,
            router.clone(),
            config.trading_pairs.clone(),
            reconciler.events().clone(),
        ));

        info!(
            domain = %config.domain,
            pairs = config.trading_pairs.len(),
            trading_required = config.trading_required,
            "connector created"
        );

        let connector = Self {
            config,
            clock,
            auth,
            rest,
            reconciler,
            normalizer,
            router,
            poller,
            user_stream,
            market_stream,
            trading_rules: RwLock::new(HashMap::new()),
            order_sequence: AtomicU64::new(0),
            shutdown: ShutdownSignal::new(),
        };
        Ok((connector, queues))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Authenticator, for transports that sign requests.
    #[must_use]
    pub fn auth(&self) -> &Arc<DecibelAuth> {
        &self.auth
    }

    /// The reconciliation core.
    #[must_use]
    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    /// The market data normalizer.
    #[must_use]
    pub fn normalizer(&self) -> &Arc<MarketDataNormalizer> {
        &self.normalizer
    }

    /// The REST poller.
    #[must_use]
    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Shutdown signal shared by the background tasks.
    #[must_use]
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Current time as seen by the exchange.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Trading rule for a pair, once loaded.
    #[must_use]
    pub fn trading_rule(&self, trading_pair: &str) -> Option<TradingRule> {
        self.trading_rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(trading_pair)
            .cloned()
    }

    /// Readiness of the startup steps.
    #[must_use]
    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            symbols_initialized: !self.normalizer.symbols().is_empty(),
            trading_rules_initialized: !self
                .trading_rules
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty(),
            account_balance: !self.config.trading_required || !self.reconciler.balances().is_empty(),
        }
    }

    // ------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------

    /// Loads the symbol map and trading rules from the markets endpoint.
    ///
    /// Markets that are not trading keep their symbol mapping but get no
    /// trading rule.
    ///
    /// # Errors
    ///
    /// Propagates transport and decode failures.
    pub async fn initialize_trading_rules(&self) -> ConnectorResult<Vec<TradingRule>> {
        let raw = self.rest.markets().await?;
        let symbols = SymbolMap::from_markets(&raw)?;
        let markets: Vec<WireMarket> = wire::decode(&raw)?;
        let inactive: HashSet<String> = markets
            .iter()
            .filter(|market| !is_market_active(market))
            .filter_map(|market| market.name.as_deref())
            .filter_map(|symbol| symbols.trading_pair(symbol))
            .map(str::to_string)
            .collect();

        let rules: Vec<TradingRule> = trading_rules(&raw, &symbols)?
            .into_iter()
            .filter(|rule| !inactive.contains(&rule.trading_pair))
            .collect();

        for pair in &self.config.trading_pairs {
            if symbols.exchange_symbol(pair).is_none() {
                warn!(trading_pair = %pair, "configured trading pair is not listed");
            }
        }

        info!(markets = symbols.len(), rules = rules.len(), inactive = inactive.len(), "markets loaded");
        self.normalizer.set_symbols(symbols);
        *self.trading_rules.write().unwrap_or_else(PoisonError::into_inner) = rules
            .iter()
            .map(|rule| (rule.trading_pair.clone(), rule.clone()))
            .collect();
        Ok(rules)
    }

    /// Resynchronizes the signing clock with the exchange.
    ///
    /// # Errors
    ///
    /// Propagates transport and decode failures.
    pub async fn sync_server_time(&self) -> ConnectorResult<i64> {
        let server_ms = self.rest.server_time().await?;
        self.clock.update_server_time(server_ms);
        Ok(self.clock.offset_ms())
    }

    /// Spawns the poller and both push listeners.
    ///
    /// Without trading, only the market stream runs.
    pub fn start(&self) -> ConnectorTasks {
        let market_stream = {
            let listener = Arc::clone(&self.market_stream);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { listener.run(shutdown).await })
        };

        if !self.config.trading_required {
            info!("trading disabled, private tasks not started");
            return ConnectorTasks {
                poller: None,
                user_stream: None,
                market_stream,
            };
        }

        let poller = {
            let poller = Arc::clone(&self.poller);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { poller.run(shutdown).await })
        };
        let user_stream = {
            let listener = Arc::clone(&self.user_stream);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move { listener.run(shutdown).await })
        };

        ConnectorTasks {
            poller: Some(poller),
            user_stream: Some(user_stream),
            market_stream,
        }
    }

    /// Signals every background task to stop.
    pub fn stop(&self) {
        info!("connector stopping");
        self.shutdown.trigger();
    }

    // ------------------------------------------------------------------
    // Orders
    // ------------------------------------------------------------------

    /// Generates a client order id: the exchange prefix followed by a
    /// sequence number and the current time, both in hex.
    #[must_use]
    pub fn new_client_order_id(&self) -> String {
        let sequence = self.order_sequence.fetch_add(1, Ordering::Relaxed);
        let mut id = format!("{CLIENT_ORDER_ID_PREFIX}{sequence:x}{:x}", self.clock.now_ms());
        id.truncate(CLIENT_ORDER_ID_MAX_LENGTH);
        id
    }

    fn exchange_symbol(&self, trading_pair: &str) -> ConnectorResult<String> {
        self.normalizer.exchange_symbol(trading_pair).ok_or_else(|| {
            ConnectorError::InvalidConfiguration(format!("unknown trading pair {trading_pair}"))
        })
    }

    fn require_trading(&self) -> ConnectorResult<()> {
        if !self.config.trading_required {
            return Err(ConnectorError::InvalidConfiguration(
                "trading is disabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Submits an order.
    ///
    /// The order is tracked in `PendingCreate` before the request is sent.
    /// Price and amount are rounded down to the pair's increments when its
    /// trading rule is loaded. A failed submission leaves the order `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateOrder` for a reused client id, or the transport or
    /// exchange error of the create request.
    pub async fn place_order(&self, mut order: NewOrder) -> ConnectorResult<TrackedOrder> {
        self.require_trading()?;
        let symbol = self.exchange_symbol(&order.trading_pair)?;

        if let Some(rule) = self.trading_rule(&order.trading_pair) {
            order.amount = rule.quantize_amount(order.amount);
            order.price = order.price.map(|price| rule.quantize_price(price));
        }
        if order.amount <= Decimal::ZERO {
            return Err(ConnectorError::Exchange(format!(
                "order {} amount rounds to zero",
                order.client_order_id
            )));
        }

        let client_order_id = order.client_order_id.clone();
        self.reconciler.register_order(order.clone(), self.now_ms())?;

        match self.rest.create_order(&order, &symbol).await {
            Ok(ack) => {
                let created_at = ack.created_at_ms.unwrap_or_else(|| self.now_ms());
                self.reconciler
                    .process_creation_response(&client_order_id, &ack.exchange_order_id, created_at)?;
                info!(
                    client_order_id = %client_order_id,
                    exchange_order_id = %ack.exchange_order_id,
                    "order placed"
                );
            }
            Err(err) => {
                warn!(client_order_id = %client_order_id, error = %err, "order submission failed");
                self.reconciler
                    .process_creation_failure(&client_order_id, self.now_ms())?;
                return Err(err);
            }
        }

        self.reconciler
            .order(&client_order_id)
            .ok_or(ConnectorError::OrderNotFound(client_order_id))
    }

    /// Cancels an order.
    ///
    /// Terminal orders are left alone. The order moves to `PendingCancel`
    /// before the request; a refused cancel returns it to `Open`.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotFound` for an unknown client id, `Exchange` if the
    /// order has no exchange id yet, or the error of the cancel request.
    pub async fn cancel_order(&self, client_order_id: &str) -> ConnectorResult<UpdateOutcome> {
        self.require_trading()?;
        let order = self
            .reconciler
            .order(client_order_id)
            .ok_or_else(|| ConnectorError::OrderNotFound(client_order_id.to_string()))?;
        if order.is_terminal() {
            return Ok(UpdateOutcome::IgnoredTerminal);
        }
        let exchange_order_id = order.exchange_order_id.ok_or_else(|| {
            ConnectorError::Exchange(format!("order {client_order_id} has no exchange order id yet"))
        })?;

        self.reconciler.begin_cancel(client_order_id, self.now_ms())?;
        match self.rest.cancel_order(&exchange_order_id).await {
            Ok(()) => {
                info!(client_order_id, exchange_order_id = %exchange_order_id, "order cancelled");
                self.reconciler
                    .process_cancel_confirmation(client_order_id, self.now_ms())
            }
            Err(err) => {
                warn!(client_order_id, error = %err, "cancel refused");
                self.reconciler
                    .process_cancel_rejection(client_order_id, self.now_ms())?;
                Err(err)
            }
        }
    }

    /// Sets leverage on a trading pair.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for zero leverage or an unknown pair,
    /// or the error of the request.
    pub async fn set_leverage(&self, trading_pair: &str, leverage: u32) -> ConnectorResult<()> {
        self.require_trading()?;
        if leverage == 0 {
            return Err(ConnectorError::InvalidConfiguration(
                "leverage must be positive".to_string(),
            ));
        }
        let symbol = self.exchange_symbol(trading_pair)?;
        self.rest.set_leverage(&symbol, leverage).await?;
        info!(trading_pair, leverage, "leverage set");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Market data and funding
    // ------------------------------------------------------------------

    /// Fetches an order book snapshot and queues it for the engine.
    ///
    /// # Errors
    ///
    /// Propagates transport and decode failures.
    pub async fn order_book_snapshot(&self, trading_pair: &str) -> ConnectorResult<OrderBookSnapshot> {
        let symbol = self.exchange_symbol(trading_pair)?;
        let raw = self.rest.order_book(&symbol, self.config.order_book_depth).await?;
        let snapshot = self.normalizer.snapshot(trading_pair, &raw)?;
        self.router.push_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    /// Current funding state of a trading pair.
    ///
    /// # Errors
    ///
    /// Propagates transport and decode failures.
    pub async fn funding_info(&self, trading_pair: &str) -> ConnectorResult<FundingInfo> {
        let symbol = self.exchange_symbol(trading_pair)?;
        let raw = self.rest.funding_info(&symbol).await?;
        self.normalizer.funding_info(trading_pair, &raw)
    }

    /// Last traded (mark) price of each requested pair.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn last_traded_prices(&self, trading_pairs: &[String]) -> ConnectorResult<HashMap<String, Decimal>> {
        let raw = self.rest.market_prices().await?;
        Ok(self.normalizer.last_traded_prices(&raw, trading_pairs))
    }

    /// Latest funding payment on a trading pair, zeros when there is none.
    ///
    /// # Errors
    ///
    /// Propagates transport and decode failures.
    pub async fn fetch_last_fee_payment(&self, trading_pair: &str) -> ConnectorResult<FundingPayment> {
        let symbol = self.exchange_symbol(trading_pair)?;
        let raw = self.rest.funding_history(&symbol).await?;
        last_funding_payment(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dec;
    use crate::execution::OrderState;
    use crate::transport::{MockRestTransport, MockWsTransport, RestMethod};
    use crate::types::ManualClock;
    use serde_json::json;

    const NOW: u64 = 1_700_000_000_000;

    fn connector(trading: bool) -> (DecibelConnector, Arc<MockRestTransport>, MarketDataQueues) {
        let rest = Arc::new(MockRestTransport::new());
        rest.respond(
            RestMethod::Get,
            "/v1/markets",
            json!({"data": [
                {"name": "BTC-PERP", "baseCurrency": "BTC", "quoteCurrency": "USD", "status": "active",
                 "priceIncrement": "0.5", "sizeIncrement": "0.01"},
                {"name": "ETH-PERP", "status": "halted"}
            ]}),
        );
        let config = ConnectorConfig::new("key", "secret")
            .with_trading_pairs(["BTC-USD"])
            .with_trading_required(trading);
        let (connector, queues) = DecibelConnector::new(
            config,
            rest.clone(),
            Arc::new(MockWsTransport::default()),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();
        (connector, rest, queues)
    }

    async fn initialized(trading: bool) -> (DecibelConnector, Arc<MockRestTransport>, MarketDataQueues) {
        let (connector, rest, queues) = connector(trading);
        connector.initialize_trading_rules().await.unwrap();
        (connector, rest, queues)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ConnectorConfig::new("", "");
        let result = DecibelConnector::new(
            config,
            Arc::new(MockRestTransport::new()),
            Arc::new(MockWsTransport::default()),
            Arc::new(ManualClock::new(NOW)),
        );
        assert!(matches!(result, Err(ConnectorError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_client_order_ids_are_unique_and_bounded() {
        let (connector, _, _) = connector(true);
        let first = connector.new_client_order_id();
        let second = connector.new_client_order_id();
        assert_ne!(first, second);
        assert!(first.starts_with(CLIENT_ORDER_ID_PREFIX));
        assert!(first.len() <= CLIENT_ORDER_ID_MAX_LENGTH);
    }

    #[tokio::test]
    async fn test_initialize_trading_rules_skips_inactive_markets() {
        let (connector, _, _) = connector(true);
        assert!(!connector.status().is_ready());

        let rules = connector.initialize_trading_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].trading_pair, "BTC-USD");
        assert!(connector.trading_rule("ETH-USD").is_none());
        assert_eq!(connector.normalizer().exchange_symbol("ETH-USD").as_deref(), Some("ETH-PERP"));

        let status = connector.status();
        assert!(status.symbols_initialized);
        assert!(status.trading_rules_initialized);
        assert!(!status.account_balance);
    }

    #[tokio::test]
    async fn test_sync_server_time_sets_offset() {
        let (connector, rest, _) = connector(true);
        rest.respond(RestMethod::Get, "/v1/time", json!({"serverTime": NOW + 250}));
        assert_eq!(connector.sync_server_time().await.unwrap(), 250);
        assert_eq!(connector.now_ms(), NOW + 250);
    }

    #[tokio::test]
    async fn test_place_order_binds_exchange_id() {
        let (connector, rest, _) = initialized(true).await;
        rest.respond(RestMethod::Post, "/v1/orders", json!({"data": {"id": "88", "createdAt": NOW + 5}}));

        let order = connector
            .place_order(NewOrder::limit_buy("c1", "BTC-USD", dec!(100.7), dec!(1.234)))
            .await
            .unwrap();
        assert_eq!(order.state, OrderState::Open);
        assert_eq!(order.exchange_order_id.as_deref(), Some("88"));
        assert_eq!(order.price, Some(dec!(100.5)));
        assert_eq!(order.amount, dec!(1.23));

        let sent = rest.requests().pop().unwrap();
        assert!(sent.auth_required);
        let body = sent.body.unwrap();
        assert_eq!(body["market"], "BTC-PERP");
        assert_eq!(body["price"], "100.5");
        assert_eq!(body["clientId"], "c1");
    }

    #[tokio::test]
    async fn test_place_order_failure_marks_failed() {
        let (connector, rest, _) = initialized(true).await;
        rest.fail(RestMethod::Post, "/v1/orders", ConnectorError::Exchange("insufficient margin".into()));

        let result = connector
            .place_order(NewOrder::market_sell("c1", "BTC-USD", dec!(1)))
            .await;
        assert_eq!(result, Err(ConnectorError::Exchange("insufficient margin".into())));
        assert_eq!(connector.reconciler().order("c1").unwrap().state, OrderState::Failed);
    }

    #[tokio::test]
    async fn test_place_order_rejects_unknown_pair_and_disabled_trading() {
        let (connector, _, _) = initialized(true).await;
        let result = connector
            .place_order(NewOrder::market_buy("c1", "DOGE-USD", dec!(1)))
            .await;
        assert!(matches!(result, Err(ConnectorError::InvalidConfiguration(_))));
        assert!(connector.reconciler().order("c1").is_none());

        let (connector, _, _) = initialized(false).await;
        let result = connector
            .place_order(NewOrder::market_buy("c1", "BTC-USD", dec!(1)))
            .await;
        assert!(matches!(result, Err(ConnectorError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_cancel_order_confirmed_and_refused() {
        let (connector, rest, _) = initialized(true).await;
        rest.respond(RestMethod::Post, "/v1/orders", json!({"id": "88"}));
        connector
            .place_order(NewOrder::limit_sell("c1", "BTC-USD", dec!(100), dec!(1)))
            .await
            .unwrap();

        rest.fail(RestMethod::Delete, "/v1/orders/88", ConnectorError::Transport("timeout".into()));
        assert!(connector.cancel_order("c1").await.is_err());
        assert_eq!(connector.reconciler().order("c1").unwrap().state, OrderState::Open);

        rest.respond(RestMethod::Delete, "/v1/orders/88", json!({"success": true}));
        let outcome = connector.cancel_order("c1").await.unwrap();
        assert!(outcome.is_applied());
        assert_eq!(connector.reconciler().order("c1").unwrap().state, OrderState::Cancelled);

        assert_eq!(connector.cancel_order("c1").await.unwrap(), UpdateOutcome::IgnoredTerminal);
        assert_eq!(rest.request_count("/v1/orders/88"), 2);
        assert!(matches!(
            connector.cancel_order("missing").await,
            Err(ConnectorError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_leverage() {
        let (connector, rest, _) = initialized(true).await;
        rest.respond(RestMethod::Post, "/v1/account/leverage", json!({"success": true}));
        connector.set_leverage("BTC-USD", 5).await.unwrap();
        let body = rest.requests().pop().unwrap().body.unwrap();
        assert_eq!(body, json!({"market": "BTC-PERP", "leverage": 5}));
        assert!(connector.set_leverage("BTC-USD", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_order_book_snapshot_is_queued() {
        let (connector, rest, mut queues) = initialized(false).await;
        rest.respond(
            RestMethod::Get,
            "/v1/markets/BTC-PERP/orderbook",
            json!({"timestamp": NOW, "data": {"bids": [["50000.0", "1.5"]], "asks": []}}),
        );
        let snapshot = connector.order_book_snapshot("BTC-USD").await.unwrap();
        assert_eq!(snapshot.update_id, NOW);
        assert_eq!(queues.snapshots.try_recv().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn test_funding_and_prices() {
        let (connector, rest, _) = initialized(true).await;
        rest.respond(
            RestMethod::Get,
            "/v1/markets/BTC-PERP/funding",
            json!({"indexPrice": "100", "markPrice": "101", "fundingRate": "0.0001", "nextFundingTime": 1_700_003_600_000u64}),
        );
        rest.respond(
            RestMethod::Get,
            "/v1/market-prices",
            json!([{"market": "BTC-PERP", "markPrice": "101"}, {"market": "ETH-PERP", "price": "5"}]),
        );
        rest.respond(RestMethod::Get, "/v1/account/funding-history", json!({"data": []}));

        let funding = connector.funding_info("BTC-USD").await.unwrap();
        assert_eq!(funding.mark_price, dec!(101));
        assert_eq!(funding.next_funding_ts_secs, 1_700_003_600);

        let prices = connector.last_traded_prices(&["BTC-USD".to_string()]).await.unwrap();
        assert_eq!(prices.len(), 1);
        assert_eq!(prices["BTC-USD"], dec!(101));

        let payment = connector.fetch_last_fee_payment("BTC-USD").await.unwrap();
        assert_eq!(payment, FundingPayment::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_trading_runs_market_stream_only() {
        let (connector, _, _) = initialized(false).await;
        let tasks = connector.start();
        assert!(tasks.poller.is_none());
        assert!(tasks.user_stream.is_none());

        connector.stop();
        assert!(tasks.market_stream.await.unwrap().is_ok());
    }
}
