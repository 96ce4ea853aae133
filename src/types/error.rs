//! Error types for the connector.

use thiserror::Error;

/// Errors surfaced by the connector.
///
/// Per-message problems inside the reconciliation core (an unknown order, a
/// duplicate fill) are not errors; they are reported through outcome enums and
/// logged. This type covers configuration, transport and protocol failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectorError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Network or transport-level failure (timeouts, 5xx, closed sockets).
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected or missing.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A payload could not be decoded into any accepted shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The exchange answered with a business error.
    #[error("exchange error: {0}")]
    Exchange(String),

    /// No tracked order matches the given identifier.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// An order with this client order id is already tracked.
    #[error("duplicate client order id: {0}")]
    DuplicateOrder(String),

    /// The operation was interrupted by shutdown.
    #[error("operation cancelled")]
    Cancelled,
}

impl ConnectorError {
    /// Returns true for failures worth retrying on the next cycle.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if the exchange rejected the request because of clock
    /// drift, which calls for a server time resync.
    #[must_use]
    pub fn is_time_sync_related(&self) -> bool {
        let description = self.to_string().to_lowercase();
        description.contains("timestamp") || description.contains("expired")
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Convenience alias for connector results.
pub type ConnectorResult<T> = Result<T, ConnectorError>;
