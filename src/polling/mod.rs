//! Fixed-interval REST polling.
//!
//! The poller is the fallback for everything push can miss. It runs two
//! cadences: the order cadence queries the status and fills of every live
//! order, the account cadence refreshes positions and balances once per
//! funding cycle. Results enter the reconciler through the same entry points
//! push events use, so a poll that lags behind push is rejected as stale
//! rather than rolling state back.
//!
//! Categories are independent. A failed positions request does not keep
//! balances from updating, and one order's failed status query does not keep
//! the others from applying.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::execution::{
    FillEvent, FillOutcome, OrderState, OrderUpdate, PositionsReport, Reconciler, TrackedOrder,
};
use crate::market::MarketDataNormalizer;
use crate::rest::RestClient;
use crate::types::error::{ConnectorError, ConnectorResult};
use crate::types::{SharedClock, ShutdownSignal};

/// Polling cadences and fan-out limit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Seconds between order status and fill polls.
    pub order_interval_secs: u64,
    /// Seconds between position and balance polls.
    pub account_interval_secs: u64,
    /// Maximum concurrent per-order requests.
    pub max_concurrency: usize,
    /// Whether the order cadence also polls fills.
    pub poll_fills: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            order_interval_secs: 10,
            account_interval_secs: 120,
            max_concurrency: 8,
            poll_fills: true,
        }
    }
}

impl PollerConfig {
    /// Checks that intervals and concurrency are positive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` naming the offending field.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.order_interval_secs == 0 || self.account_interval_secs == 0 {
            return Err(ConnectorError::InvalidConfiguration(
                "poll intervals must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConnectorError::InvalidConfiguration(
                "max_concurrency must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Poll category, for failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollCategory {
    /// Per-order status query.
    OrderStatus,
    /// Per-order fills query.
    Fills,
    /// Positions query.
    Positions,
    /// Balances query.
    Balances,
}

/// One failed poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollFailure {
    /// Category that failed.
    pub category: PollCategory,
    /// Client order id for per-order categories.
    pub client_order_id: Option<String>,
    /// The error.
    pub error: ConnectorError,
}

/// Outcome of a poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Orders queried for status.
    pub orders_polled: usize,
    /// Status results that changed an order.
    pub status_applied: usize,
    /// New fills recorded.
    pub fills_applied: usize,
    /// Positions reconcile summary, if positions were polled successfully.
    pub positions: Option<PositionsReport>,
    /// Assets written, if balances were polled successfully.
    pub balances_updated: Option<usize>,
    /// Failed requests.
    pub failures: Vec<PollFailure>,
}

impl PollReport {
    /// Folds another report into this one.
    pub fn merge(&mut self, other: PollReport) {
        self.orders_polled += other.orders_polled;
        self.status_applied += other.status_applied;
        self.fills_applied += other.fills_applied;
        self.positions = other.positions.or(self.positions);
        self.balances_updated = other.balances_updated.or(self.balances_updated);
        self.failures.extend(other.failures);
    }

    /// Returns true if no request failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn failure(&mut self, category: PollCategory, client_order_id: Option<&str>, error: ConnectorError) {
        warn!(
            category = ?category,
            client_order_id = client_order_id.unwrap_or_default(),
            error = %error,
            "poll request failed"
        );
        self.failures.push(PollFailure {
            category,
            client_order_id: client_order_id.map(str::to_string),
            error,
        });
    }
}

/// REST poller feeding the reconciler.
pub struct Poller {
    config: PollerConfig,
    rest: RestClient,
    reconciler: Arc<Reconciler>,
    normalizer: Arc<MarketDataNormalizer>,
    clock: SharedClock,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Poller {
    /// Creates a poller.
    #[must_use]
    pub fn new(
        config: PollerConfig,
        rest: RestClient,
        reconciler: Arc<Reconciler>,
        normalizer: Arc<MarketDataNormalizer>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            rest,
            reconciler,
            normalizer,
            clock,
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Runs both cadences until `shutdown` triggers.
    ///
    /// The cadences are independent loops, so a slow account cycle never
    /// delays order polling. Both timers fire immediately on start. A cycle
    /// in progress is abandoned when shutdown triggers.
    pub async fn run(&self, shutdown: ShutdownSignal) {
        info!(
            order_interval_secs = self.config.order_interval_secs,
            account_interval_secs = self.config.account_interval_secs,
            "poller started"
        );

        tokio::join!(
            run_cadence("orders", self.config.order_interval_secs, &shutdown, || self.poll_orders()),
            run_cadence("account", self.config.account_interval_secs, &shutdown, || self.poll_account()),
        );

        info!("poller stopped");
    }

    /// Order cadence: statuses and, if enabled, fills, concurrently.
    pub async fn poll_orders(&self) -> PollReport {
        let mut report = PollReport::default();
        if self.config.poll_fills {
            let (status, fills) = tokio::join!(self.poll_order_status(), self.poll_fills());
            report.merge(status);
            report.merge(fills);
        } else {
            report.merge(self.poll_order_status().await);
        }
        report
    }

    /// Account cadence: positions and balances, concurrently.
    pub async fn poll_account(&self) -> PollReport {
        let (positions, balances) = tokio::join!(self.poll_positions(), self.poll_balances());
        let mut report = positions;
        report.merge(balances);
        report
    }

    /// Queries the status of every live order that has an exchange id.
    pub async fn poll_order_status(&self) -> PollReport {
        let orders = self.reconciler.pollable_orders();
        let mut report = PollReport {
            orders_polled: orders.len(),
            ..PollReport::default()
        };

        let results: Vec<(TrackedOrder, ConnectorResult<bool>)> = stream::iter(orders)
            .map(|order| async move {
                let result = self.poll_one_status(&order).await;
                (order, result)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for (order, result) in results {
            match result {
                Ok(true) => report.status_applied += 1,
                Ok(false) => {}
                Err(err) => report.failure(PollCategory::OrderStatus, Some(&order.client_order_id), err),
            }
        }
        report
    }

    async fn poll_one_status(&self, order: &TrackedOrder) -> ConnectorResult<bool> {
        let Some(exchange_order_id) = order.exchange_order_id.as_deref() else {
            return Ok(false);
        };
        let status = self.rest.order_status(exchange_order_id).await?;
        let state = OrderState::from_exchange_status(status.status.as_deref().unwrap_or_default());
        let timestamp_ms = status.updated_at.unwrap_or_else(|| self.clock.now_ms());
        let update = OrderUpdate::new(order.client_order_id.clone(), state, timestamp_ms)
            .with_exchange_order_id(exchange_order_id);
        Ok(self.reconciler.apply_order_update(&update).is_applied())
    }

    /// Queries fills of every live order that has an exchange id.
    pub async fn poll_fills(&self) -> PollReport {
        let orders = self.reconciler.pollable_orders();
        let mut report = PollReport::default();

        let results: Vec<(TrackedOrder, ConnectorResult<usize>)> = stream::iter(orders)
            .map(|order| async move {
                let result = self.poll_one_fills(&order).await;
                (order, result)
            })
            .buffer_unordered(self.config.max_concurrency)
            .collect()
            .await;

        for (order, result) in results {
            match result {
                Ok(applied) => report.fills_applied += applied,
                Err(err) => report.failure(PollCategory::Fills, Some(&order.client_order_id), err),
            }
        }
        report
    }

    async fn poll_one_fills(&self, order: &TrackedOrder) -> ConnectorResult<usize> {
        let Some(exchange_order_id) = order.exchange_order_id.as_deref() else {
            return Ok(0);
        };
        let fills = self.rest.fills(exchange_order_id).await?;
        let now_ms = self.clock.now_ms();

        let mut applied = 0;
        for mut fill in fills {
            fill.order_id.get_or_insert_with(|| exchange_order_id.to_string());
            let Some(event) = FillEvent::from_wire(fill, now_ms) else {
                debug!(exchange_order_id, "skipping incomplete fill from poll");
                continue;
            };
            if self.reconciler.apply_fill_event(&event) == FillOutcome::Applied {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Refreshes positions.
    pub async fn poll_positions(&self) -> PollReport {
        let mut report = PollReport::default();
        let result = match self.rest.positions().await {
            Ok(raw) => self
                .reconciler
                .reconcile_positions(&raw, |symbol| self.normalizer.trading_pair(symbol)),
            Err(err) => Err(err),
        };
        match result {
            Ok(positions) => report.positions = Some(positions),
            Err(err) => report.failure(PollCategory::Positions, None, err),
        }
        report
    }

    /// Refreshes balances.
    pub async fn poll_balances(&self) -> PollReport {
        let mut report = PollReport::default();
        let result = match self.rest.account_overview().await {
            Ok(raw) => self.reconciler.reconcile_balances(&raw),
            Err(err) => Err(err),
        };
        match result {
            Ok(count) => report.balances_updated = Some(count),
            Err(err) => report.failure(PollCategory::Balances, None, err),
        }
        report
    }
}

async fn run_cadence<F, Fut>(cadence: &str, period_secs: u64, shutdown: &ShutdownSignal, cycle: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = PollReport>,
{
    let mut timer = interval(Duration::from_secs(period_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = timer.tick() => {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    report = cycle() => log_cycle(cadence, &report),
                }
            }
        }
    }
    debug!(cadence, "poll cadence stopped");
}

fn log_cycle(cadence: &str, report: &PollReport) {
    debug!(
        cadence,
        orders_polled = report.orders_polled,
        status_applied = report.status_applied,
        fills_applied = report.fills_applied,
        failures = report.failures.len(),
        "poll cycle complete"
    );
}
