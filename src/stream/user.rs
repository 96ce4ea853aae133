//! Private user stream: order, fill and position push events.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, info, trace, warn};

use super::{StreamConfig, ping_frame, supervise};
use crate::auth::DecibelAuth;
use crate::constants::{WS_FILLS_CHANNEL, WS_ORDERS_CHANNEL, WS_POSITIONS_CHANNEL};
use crate::execution::{FaultSource, FillEvent, FillOutcome, OrderEvent, Reconciler};
use crate::transport::{WsSession, WsTransport};
use crate::types::error::{ConnectorError, ConnectorResult};
use crate::types::{SharedClock, ShutdownSignal};
use crate::wire::{self, WireAuthAck, WireFill, WireFrame, WireOrder};

/// Subscription frame for the private channels.
#[must_use]
pub fn subscribe_frame() -> Value {
    json!({
        "op": "subscribe",
        "args": [WS_ORDERS_CHANNEL, WS_FILLS_CHANNEL, WS_POSITIONS_CHANNEL],
    })
}

/// Listener feeding private push events into the reconciler.
pub struct UserStreamListener {
    config: StreamConfig,
    url: String,
    transport: Arc<dyn WsTransport>,
    auth: Arc<DecibelAuth>,
    reconciler: Arc<Reconciler>,
    clock: SharedClock,
}

impl std::fmt::Debug for UserStreamListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStreamListener")
            .field("url", &self.url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl UserStreamListener {
    /// Creates a listener.
    #[must_use]
    pub fn new(
        config: StreamConfig,
        url: impl Into<String>,
        transport: Arc<dyn WsTransport>,
        auth: Arc<DecibelAuth>,
        reconciler: Arc<Reconciler>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            url: url.into(),
            transport,
            auth,
            reconciler,
            clock,
        }
    }

    /// Runs until shutdown.
    ///
    /// # Errors
    ///
    /// Returns `Authentication` if the exchange rejects the login.
    pub async fn run(&self, shutdown: ShutdownSignal) -> ConnectorResult<()> {
        supervise(
            FaultSource::UserStream,
            self.config.backoff(),
            self.reconciler.events(),
            &shutdown,
            || self.session(),
        )
        .await
    }

    async fn session(&self) -> ConnectorResult<()> {
        let mut session = self.transport.connect(&self.url).await?;
        session.send(self.auth.ws_auth_frame()).await?;
        self.await_auth_ack(session.as_mut()).await?;
        session.send(subscribe_frame()).await?;
        info!(url = %self.url, "user stream subscribed");

        let mut heartbeat = self.config.heartbeat();
        loop {
            tokio::select! {
                frame = session.next_frame() => match frame {
                    Some(Ok(frame)) => {
                        self.handle_frame(&frame);
                    }
                    Some(Err(err)) => return Err(err),
                    None => return Ok(()),
                },
                _ = heartbeat.tick() => session.send(ping_frame()).await?,
            }
        }
    }

    async fn await_auth_ack(&self, session: &mut dyn WsSession) -> ConnectorResult<()> {
        let timeout = Duration::from_millis(self.config.auth_timeout_ms);
        tokio::time::timeout(timeout, Self::read_auth_ack(session))
            .await
            .map_err(|_| ConnectorError::Transport("timed out waiting for login acknowledgement".to_string()))?
    }

    async fn read_auth_ack(session: &mut dyn WsSession) -> ConnectorResult<()> {
        loop {
            let raw = match session.next_frame().await {
                Some(result) => result?,
                None => {
                    return Err(ConnectorError::Transport(
                        "session closed before login acknowledgement".to_string(),
                    ));
                }
            };

            let ack: WireAuthAck = match wire::decode(&raw) {
                Ok(ack) => ack,
                Err(err) => {
                    warn!(error = %err, "skipping undecodable frame before login acknowledgement");
                    continue;
                }
            };
            match ack.success {
                Some(true) => {
                    debug!("user stream login accepted");
                    return Ok(());
                }
                Some(false) => {
                    return Err(ConnectorError::Authentication(
                        ack.message.unwrap_or_else(|| "login rejected".to_string()),
                    ));
                }
                None => warn!(frame = %raw, "skipping frame without login result"),
            }
        }
    }

    /// Dispatches one push frame to the reconciler.
    ///
    /// Returns how many order updates and fills were applied. Malformed
    /// frames are logged and skipped.
    pub fn handle_frame(&self, raw: &Value) -> usize {
        let frame: WireFrame = match serde_json::from_value(raw.clone()) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "skipping malformed user stream frame");
                return 0;
            }
        };

        match frame.channel_head() {
            WS_ORDERS_CHANNEL => self.handle_orders(&frame.data),
            WS_FILLS_CHANNEL => self.handle_fills(&frame.data),
            WS_POSITIONS_CHANNEL => {
                // Positions follow the poll; push is informational.
                trace!("position push received");
                0
            }
            _ => {
                trace!(channel = %frame.channel, "ignoring user stream frame");
                0
            }
        }
    }

    fn handle_orders(&self, data: &Value) -> usize {
        let orders: Vec<WireOrder> = match wire::decode_list(data) {
            Ok(orders) => orders,
            Err(err) => {
                warn!(error = %err, "skipping malformed order push");
                return 0;
            }
        };
        let now_ms = self.clock.now_ms();
        orders
            .into_iter()
            .map(|order| OrderEvent::from_wire(order, now_ms))
            .filter(|event| self.reconciler.apply_order_event(event).is_applied())
            .count()
    }

    fn handle_fills(&self, data: &Value) -> usize {
        let fills: Vec<WireFill> = match wire::decode_list(data) {
            Ok(fills) => fills,
            Err(err) => {
                warn!(error = %err, "skipping malformed fill push");
                return 0;
            }
        };
        let now_ms = self.clock.now_ms();
        fills
            .into_iter()
            .filter_map(|fill| {
                let event = FillEvent::from_wire(fill, now_ms);
                if event.is_none() {
                    warn!("skipping fill push without id, order id, price or size");
                }
                event
            })
            .filter(|event| self.reconciler.apply_fill_event(event) == FillOutcome::Applied)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::dec;
    use crate::execution::{ConnectorEvent, NewOrder, OrderState};
    use crate::transport::{MockWsTransport, WsScript};
    use crate::types::ManualClock;

    fn listener(scripts: Vec<WsScript>) -> (Arc<UserStreamListener>, Arc<MockWsTransport>, Arc<Reconciler>) {
        let clock: SharedClock = Arc::new(ManualClock::new(1_700_000_000_000));
        let transport = Arc::new(MockWsTransport::new(scripts));
        let reconciler = Arc::new(Reconciler::with_defaults());
        reconciler
            .register_order(NewOrder::limit_buy("c1", "BTC-USD", dec!(100), dec!(1)), 1_000)
            .unwrap();
        reconciler.process_creation_response("c1", "88", 1_001).unwrap();

        let auth = Arc::new(DecibelAuth::new(Credentials::new("key", "secret"), Arc::clone(&clock)));
        let listener = Arc::new(UserStreamListener::new(
            StreamConfig::default(),
            "wss://test",
            transport.clone(),
            auth,
            Arc::clone(&reconciler),
            clock,
        ));
        (listener, transport, reconciler)
    }

    fn ack(success: bool) -> ConnectorResult<Value> {
        Ok(json!({"success": success, "message": "bad key"}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_subscribe_and_dispatch() {
        let (listener, transport, reconciler) = listener(vec![WsScript::FramesThenIdle(vec![
            ack(true),
            Ok(json!("garbage")),
            Ok(json!({"channel": "orders", "data": {"clientId": "c1", "id": "88", "status": "partial", "updatedAt": 2_000}})),
            Ok(json!({"channel": "fills", "data": [{"id": "f1", "orderId": "88", "price": "100", "size": "0.5", "createdAt": 2_001}]})),
            Ok(json!({"channel": "positions", "data": [{"market": "BTC-PERP", "size": "0.5"}]})),
        ])]);

        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let order = reconciler.order("c1").unwrap();
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.executed_amount_base, dec!(0.5));
        assert!(reconciler.positions().is_empty());

        let sent = transport.sent();
        assert_eq!(sent[0]["op"], "auth");
        assert_eq!(sent[0]["args"][0], "key");
        assert_eq!(sent[1], subscribe_frame());

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_before_login_result_are_skipped() {
        let (listener, transport, reconciler) = listener(vec![WsScript::FramesThenIdle(vec![
            Ok(json!({"type": "welcome", "message": "connected"})),
            ack(true),
            Ok(json!({"channel": "orders", "data": {"id": "88", "status": "partial", "updatedAt": 2_000}})),
        ])]);

        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.sent()[1], subscribe_frame());
        assert_eq!(reconciler.order("c1").unwrap().state, OrderState::PartiallyFilled);

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_login_faults_and_stops() {
        let (listener, transport, reconciler) = listener(vec![WsScript::Frames(vec![ack(false)])]);
        let mut events = reconciler.subscribe();

        let result = listener.run(ShutdownSignal::new()).await;
        assert_eq!(result, Err(ConnectorError::Authentication("bad key".into())));
        assert_eq!(transport.connect_attempts(), 1);
        assert!(matches!(
            events.try_recv().unwrap(),
            ConnectorEvent::ConnectivityFault {
                source: FaultSource::UserStream,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_backoff() {
        let (listener, transport, _) = listener(vec![
            WsScript::Refuse(ConnectorError::Transport("refused".into())),
            WsScript::FramesThenIdle(vec![ack(true)]),
        ]);
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport.connect_attempts(), 1);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(transport.connect_attempts(), 2);

        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let (listener, transport, _) =
            listener(vec![WsScript::Refuse(ConnectorError::Transport("refused".into()))]);
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
        assert_eq!(transport.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_ack_times_out_and_retries() {
        let (listener, transport, _) = listener(vec![
            WsScript::FramesThenIdle(vec![]),
            WsScript::FramesThenIdle(vec![ack(true)]),
        ]);
        let shutdown = ShutdownSignal::new();
        let signal = shutdown.clone();
        let task = Arc::clone(&listener);
        let handle = tokio::spawn(async move { task.run(signal).await });

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(transport.connect_attempts(), 2);
        shutdown.trigger();
        assert!(handle.await.unwrap().is_ok());
    }
}
