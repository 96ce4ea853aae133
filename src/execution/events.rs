//! Events emitted to the trading engine.

use tokio::sync::broadcast;
use tracing::trace;

use super::status::OrderState;
use super::types::TradeFill;

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// An applied order state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdateEvent {
    /// Client order id.
    pub client_order_id: String,
    /// Exchange order id, if assigned.
    pub exchange_order_id: Option<String>,
    /// Trading pair.
    pub trading_pair: String,
    /// State before the update.
    pub previous_state: OrderState,
    /// State after the update.
    pub new_state: OrderState,
    /// Update time in milliseconds.
    pub timestamp_ms: u64,
}

/// Which part of the connector lost connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSource {
    /// Private user stream.
    UserStream,
    /// Public market data stream.
    MarketStream,
}

/// Event published on the [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    /// An order changed state.
    OrderUpdate(OrderUpdateEvent),
    /// A fill was recorded.
    Trade(TradeFill),
    /// A listener stopped and will not retry.
    ConnectivityFault {
        /// Listener that failed.
        source: FaultSource,
        /// Human readable cause.
        reason: String,
    },
}

/// Broadcast fan-out of [`ConnectorEvent`]s.
///
/// Slow subscribers observe `RecvError::Lagged` and skip ahead; publishing
/// never blocks the reconciler.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ConnectorEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver observing events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscriber is not an error.
    pub fn publish(&self, event: ConnectorEvent) {
        if self.sender.send(event).is_err() {
            trace!("event published with no subscribers");
        }
    }

    /// Number of live receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
