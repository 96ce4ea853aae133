//! Routes market data frames onto per-kind queues.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::debug;

use super::normalizer::MarketDataNormalizer;
use super::types::{FundingInfo, OrderBookDiff, OrderBookSnapshot, TradeEvent};
use crate::constants::{WS_FUNDING_CHANNEL, WS_ORDERBOOK_CHANNEL, WS_TRADES_CHANNEL};

/// What happened to a routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A diff was queued.
    Diff,
    /// This many trades were queued.
    Trades(usize),
    /// A funding update was queued.
    Funding,
    /// The frame belongs to no market data channel.
    Ignored,
    /// The frame was on a market data channel but produced nothing.
    Dropped,
}

/// Receiving ends of the market data queues, handed to the engine.
#[derive(Debug)]
pub struct MarketDataQueues {
    /// Order book snapshots.
    pub snapshots: mpsc::UnboundedReceiver<OrderBookSnapshot>,
    /// Order book diffs.
    pub diffs: mpsc::UnboundedReceiver<OrderBookDiff>,
    /// Public trades.
    pub trades: mpsc::UnboundedReceiver<TradeEvent>,
    /// Funding updates.
    pub funding: mpsc::UnboundedReceiver<FundingInfo>,
}

/// Classifies frames by channel and pushes normalized events.
///
/// Queue sends never block; a closed receiver only drops the event.
#[derive(Debug, Clone)]
pub struct MarketDataRouter {
    normalizer: Arc<MarketDataNormalizer>,
    snapshots: mpsc::UnboundedSender<OrderBookSnapshot>,
    diffs: mpsc::UnboundedSender<OrderBookDiff>,
    trades: mpsc::UnboundedSender<TradeEvent>,
    funding: mpsc::UnboundedSender<FundingInfo>,
}

impl MarketDataRouter {
    /// Creates a router and the queues it feeds.
    #[must_use]
    pub fn new(normalizer: Arc<MarketDataNormalizer>) -> (Self, MarketDataQueues) {
        let (snapshots_tx, snapshots_rx) = mpsc::unbounded_channel();
        let (diffs_tx, diffs_rx) = mpsc::unbounded_channel();
        let (trades_tx, trades_rx) = mpsc::unbounded_channel();
        let (funding_tx, funding_rx) = mpsc::unbounded_channel();

        let router = Self {
            normalizer,
            snapshots: snapshots_tx,
            diffs: diffs_tx,
            trades: trades_tx,
            funding: funding_tx,
        };
        let queues = MarketDataQueues {
            snapshots: snapshots_rx,
            diffs: diffs_rx,
            trades: trades_rx,
            funding: funding_rx,
        };
        (router, queues)
    }

    /// The normalizer in use.
    #[must_use]
    pub fn normalizer(&self) -> &Arc<MarketDataNormalizer> {
        &self.normalizer
    }

    /// Routes one push frame.
    pub fn route(&self, frame: &Value) -> RouteOutcome {
        let channel = frame.get("channel").and_then(Value::as_str).unwrap_or_default();
        let head = channel.split('.').next().unwrap_or_default();

        match head {
            WS_ORDERBOOK_CHANNEL => match self.normalizer.diff(frame) {
                Some(diff) => {
                    let _ = self.diffs.send(diff);
                    RouteOutcome::Diff
                }
                None => RouteOutcome::Dropped,
            },
            WS_TRADES_CHANNEL => {
                let trades = self.normalizer.trades(frame);
                let count = trades.len();
                for trade in trades {
                    let _ = self.trades.send(trade);
                }
                if count == 0 {
                    RouteOutcome::Dropped
                } else {
                    RouteOutcome::Trades(count)
                }
            }
            WS_FUNDING_CHANNEL => match self.normalizer.funding_update(frame) {
                Some(funding) => {
                    let _ = self.funding.send(funding);
                    RouteOutcome::Funding
                }
                None => RouteOutcome::Dropped,
            },
            _ => {
                debug!(channel = %channel, "ignoring frame outside market data channels");
                RouteOutcome::Ignored
            }
        }
    }

    /// Queues a snapshot fetched over REST.
    pub fn push_snapshot(&self, snapshot: OrderBookSnapshot) {
        let _ = self.snapshots.send(snapshot);
    }

    /// Subscription frame for every mapped trading pair in `trading_pairs`.
    ///
    /// Returns `None` when no pair maps to an exchange symbol.
    #[must_use]
    pub fn subscribe_frame(&self, trading_pairs: &[String]) -> Option<Value> {
        let args: Vec<String> = trading_pairs
            .iter()
            .filter_map(|pair| self.normalizer.exchange_symbol(pair))
            .flat_map(|symbol| {
                [WS_ORDERBOOK_CHANNEL, WS_TRADES_CHANNEL, WS_FUNDING_CHANNEL]
                    .map(|channel| format!("{channel}.{symbol}"))
            })
            .collect();
        if args.is_empty() {
            return None;
        }
        Some(json!({"op": "subscribe", "args": args}))
    }
}
