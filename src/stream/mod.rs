//! Supervised push listeners.
//!
//! Each listener owns one WebSocket session at a time. When the session
//! fails or the peer closes it, the supervisor logs, waits a fixed backoff
//! and reconnects. Shutdown interrupts both the session and the backoff.
//! Authentication failures are not retried: they are published as a
//! [`ConnectorEvent::ConnectivityFault`] and end the listener.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use crate::constants::HEARTBEAT_TIME_INTERVAL_SECS;
use crate::execution::{ConnectorEvent, EventBus, FaultSource};
use crate::types::ShutdownSignal;
use crate::types::error::{ConnectorError, ConnectorResult};

/// Public market data listener.
pub mod market;

/// Private user stream listener.
pub mod user;

pub use market::MarketStreamListener;
pub use user::UserStreamListener;

/// Listener timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Wait between a failed session and the next connection attempt.
    pub reconnect_backoff_ms: u64,
    /// Seconds between pings on an idle session.
    pub heartbeat_secs: u64,
    /// How long the user stream waits for the login acknowledgement.
    pub auth_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff_ms: 5_000,
            heartbeat_secs: HEARTBEAT_TIME_INTERVAL_SECS,
            auth_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    /// Checks that every duration is positive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if a duration is zero.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.reconnect_backoff_ms == 0 || self.heartbeat_secs == 0 || self.auth_timeout_ms == 0 {
            return Err(ConnectorError::InvalidConfiguration(
                "stream durations must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    fn heartbeat(&self) -> Interval {
        let period = Duration::from_secs(self.heartbeat_secs);
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat
    }
}

fn ping_frame() -> Value {
    json!({"op": "ping"})
}

fn listener_name(source: FaultSource) -> &'static str {
    match source {
        FaultSource::UserStream => "user_stream",
        FaultSource::MarketStream => "market_stream",
    }
}

/// Runs `session` until shutdown, reconnecting after `backoff`.
async fn supervise<F, Fut>(
    source: FaultSource,
    backoff: Duration,
    events: &EventBus,
    shutdown: &ShutdownSignal,
    mut session: F,
) -> ConnectorResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConnectorResult<()>>,
{
    let listener = listener_name(source);
    info!(listener, "listener started");

    while !shutdown.triggered() {
        let result = tokio::select! {
            _ = shutdown.wait() => break,
            result = session() => result,
        };

        match result {
            Ok(()) => info!(listener, "session closed by peer"),
            Err(ConnectorError::Cancelled) => break,
            Err(ConnectorError::Authentication(reason)) => {
                error!(listener, reason = %reason, "authentication failed, listener stopping");
                events.publish(ConnectorEvent::ConnectivityFault {
                    source,
                    reason: reason.clone(),
                });
                return Err(ConnectorError::Authentication(reason));
            }
            Err(err) => warn!(listener, error = %err, "session failed"),
        }

        info!(listener, backoff_ms = backoff.as_millis() as u64, "reconnecting after backoff");
        if !shutdown.sleep(backoff).await {
            break;
        }
    }

    info!(listener, "listener stopped");
    Ok(())
}
