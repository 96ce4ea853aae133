//! Shared types used across the connector.

/// Error types and result alias.
pub mod error;

/// Cooperative shutdown signal for background loops.
pub mod shutdown;

/// Clock abstraction and server-time synchronization.
pub mod time;

pub use error::{ConnectorError, ConnectorResult};
pub use shutdown::ShutdownSignal;
pub use time::{Clock, ManualClock, SharedClock, SystemClock, TimeSynchronizer};
