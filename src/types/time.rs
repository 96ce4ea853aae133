//! Clock abstraction.
//!
//! Every component that needs "now" reads it through [`Clock`] so tests can
//! drive time explicitly and production can apply a server-time offset.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use tracing::debug;

/// Source of the current time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;
}

/// Shared, dynamically dispatched clock.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `chrono::Utc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually driven clock for tests and replays.
///
/// # Example
///
/// ```rust
/// use decibel_perp_rs::types::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `now_ms`.
    #[must_use]
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Clock corrected by the offset between exchange server time and local time.
///
/// Signed requests carry a timestamp the exchange validates against its own
/// clock; the offset keeps that timestamp inside the accepted window.
pub struct TimeSynchronizer {
    local: SharedClock,
    offset_ms: AtomicI64,
}

impl TimeSynchronizer {
    /// Creates a synchronizer over a local clock with zero offset.
    #[must_use]
    pub fn new(local: SharedClock) -> Self {
        Self {
            local,
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Records a server time sample taken at the current local time.
    pub fn update_server_time(&self, server_ms: u64) {
        let local_ms = self.local.now_ms();
        let offset = server_ms as i64 - local_ms as i64;
        self.offset_ms.store(offset, Ordering::SeqCst);
        debug!(offset_ms = offset, "server time offset updated");
    }

    /// Current offset applied to the local clock.
    #[must_use]
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::SeqCst)
    }
}

impl Clock for TimeSynchronizer {
    fn now_ms(&self) -> u64 {
        let adjusted = self.local.now_ms() as i64 + self.offset_ms();
        u64::try_from(adjusted).unwrap_or(0)
    }
}
