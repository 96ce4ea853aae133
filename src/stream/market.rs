//! Public market data stream.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{StreamConfig, ping_frame, supervise};
use crate::execution::{EventBus, FaultSource};
use crate::market::{MarketDataRouter, RouteOutcome};
use crate::transport::WsTransport;
use crate::types::ShutdownSignal;
use crate::types::error::ConnectorResult;

/// Listener feeding order book diffs, trades and funding updates into the
/// market data queues.
pub struct MarketStreamListener {
    config: StreamConfig,
    url: String,
    transport: Arc<dyn WsTransport>,
    router: MarketDataRouter,
    trading_pairs: Vec<String>,
    events: EventBus,
}

impl std::fmt::Debug for MarketStreamListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketStreamListener")
            .field("url", &self.url)
            .field("trading_pairs", &self.trading_pairs)
            .finish_non_exhaustive()
    }
}

impl MarketStreamListener {
    /// Creates a listener for `trading_pairs`.
    #[must_use]
    pub fn new(
        config: StreamConfig,
        url: impl Into<String>,
        transport: Arc<dyn WsTransport>,
        router: MarketDataRouter,
        trading_pairs: Vec<String>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            url: url.into(),
            transport,
            router,
            trading_pairs,
            events,
        }
    }

    /// Runs until shutdown, reconnecting after every failure.
    ///
    /// # Errors
    ///
    /// Only an authentication failure ends the listener with an error.
    pub async fn run(&self, shutdown: ShutdownSignal) -> ConnectorResult<()> {
        supervise(
            FaultSource::MarketStream,
            self.config.backoff(),
            &self.events,
            &shutdown,
            || self.session(),
        )
        .await
    }

    async fn session(&self) -> ConnectorResult<()> {
        let mut session = self.transport.connect(&self.url).await?;

        // Symbols can change between sessions, so the frame is rebuilt.
        match self.router.subscribe_frame(&self.trading_pairs) {
            Some(frame) => {
                session.send(frame).await?;
                info!(url = %self.url, pairs = self.trading_pairs.len(), "market stream subscribed");
            }
            None => warn!(pairs = ?self.trading_pairs, "no trading pair maps to an exchange symbol"),
        }

        let mut heartbeat = self.config.heartbeat();
        loop {
            tokio::select! {
                frame = session.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        if self.router.route(&frame) == RouteOutcome::Dropped {
                            debug!("market data frame produced no event");
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Ok(()),
                },
                _ = heartbeat.tick() => session.send(ping_frame()).await?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{MarketDataNormalizer, MarketDataQueues, SymbolMap};
    use crate::transport::{MockWsTransport, WsScript};
    use crate::types::ManualClock;
    use crate::types::error::ConnectorError;
    use serde_json::json;
    use std::time::Duration;

    fn listener(scripts: Vec<WsScript>) -> (Arc<MarketStreamListener>, Arc<MockWsTransport>, MarketDataQueues) {
        let normalizer = MarketDataNormalizer::new(
            SymbolMap::from_pairs([("BTC-PERP", "BTC-USD")]),
            100,
            Arc::new(ManualClock::new(1_000)),
        );
        let (router, queues) = MarketDataRouter::new(Arc::new(normalizer));
        let transport = Arc::new(MockWsTransport::new(scripts));
        let listener = Arc::new(MarketStreamListener::new(
            StreamConfig::default(),
            "wss://test",
            transport.clone(),
            router,
            vec!["BTC-USD".to_string()],
            EventBus::new(8),
        ));
        (listener, transport, queues)
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribes_and_routes_frames() {
        let (listener, transport, mut queues) = listener(vec![WsScript::FramesThenIdle(vec![
            Ok(json!({"channel": "orderbook.BTC-PERP", "market": "BTC-PERP",
                      "data": {"timestamp": 10, "bids": [["100", "1"]], "asks": []}})),
            Ok(json!({"channel": "trades.BTC-PERP", "market": "BTC-PERP",
                      "data": [{"id": "t1", "price": "100", "size": "0.1"}]})),
            Ok(json!({"channel": "trades.DOGE-PERP", "market": "DOGE-PERP",
                      "data": [{"id": "t2", "price": "1", "size": "1"}]})),
        ])]);

        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            transport.sent()[0],
            json!({"op": "subscribe", "args": ["orderbook.BTC-PERP", "trades.BTC-PERP", "funding.BTC-PERP"]})
        );
        assert_eq!(queues.diffs.try_recv().unwrap().trading_pair, "BTC-USD");
        assert_eq!(queues.trades.try_recv().unwrap().trade_id, "t1");
        assert!(queues.trades.try_recv().is_err());

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_on_idle_session() {
        let (listener, transport, _queues) = listener(vec![WsScript::FramesThenIdle(vec![])]);
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(61)).await;
        let pings = transport.sent().iter().filter(|frame| **frame == ping_frame()).count();
        assert_eq!(pings, 2);

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_error() {
        let (listener, transport, _queues) = listener(vec![
            WsScript::Frames(vec![Err(ConnectorError::Transport("reset".into()))]),
            WsScript::FramesThenIdle(vec![]),
        ]);
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(transport.connect_attempts(), 2);
        // One subscription per session.
        let subscriptions = transport
            .sent()
            .iter()
            .filter(|frame| frame["op"] == "subscribe")
            .count();
        assert_eq!(subscriptions, 2);

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }
}
