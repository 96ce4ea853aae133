//! Connector configuration.
//!
//! Configuration is plain data with defaults mirroring the exchange's
//! published behavior. Hosts typically deserialize [`ConnectorConfig`] from
//! their own config layer, or build it with the `with_*` methods.
//!
//! # Example
//!
//! ```rust
//! use decibel_perp_rs::config::{ConnectorConfig, PositionMode};
//!
//! let config = ConnectorConfig::new("key", "secret")
//!     .with_trading_pairs(["BTC-USD", "ETH-USD"])
//!     .with_position_mode(PositionMode::Hedge);
//!
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;

use crate::Decimal;
use crate::constants;
use crate::types::error::{ConnectorError, ConnectorResult};

pub use crate::execution::ReconcilerConfig;
pub use crate::polling::PollerConfig;
pub use crate::stream::StreamConfig;

/// How positions are keyed on the exchange account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMode {
    /// One net position per trading pair.
    #[default]
    OneWay,
    /// Separate long and short positions per trading pair.
    Hedge,
}

/// What a positions poll means for trading pairs it does not mention.
///
/// The exchange may omit flat positions from the response, so absence is
/// ambiguous. `Retain` keeps whatever the table held before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentPositionPolicy {
    /// Absent trading pairs are left unchanged.
    #[default]
    Retain,
    /// Absent trading pairs are treated as flat and removed.
    Flatten,
}

/// Trading fee schedule applied to fills.
///
/// Fees are charged on the quote asset. The percentage model is the primary
/// one; `Flat` makes the connector trust the fee reported on each fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FeeSchedule {
    /// Percentage of fill notional, split by liquidity role.
    Percentage {
        /// Maker rate as a decimal fraction (0.0002 = 0.02%).
        maker: Decimal,
        /// Taker rate as a decimal fraction.
        taker: Decimal,
    },
    /// Use the fee reported by the exchange on each fill.
    Flat,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::Percentage {
            maker: Decimal::new(2, 4),
            taker: Decimal::new(5, 4),
        }
    }
}

impl FeeSchedule {
    /// Rate for the given liquidity role, or `None` under the flat model.
    #[must_use]
    pub fn rate(&self, is_maker: bool) -> Option<Decimal> {
        match self {
            Self::Percentage { maker, taker } => Some(if is_maker { *maker } else { *taker }),
            Self::Flat => None,
        }
    }
}

/// API credentials.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    /// API key sent in clear.
    pub api_key: String,
    /// API secret used as HMAC key.
    pub api_secret: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Top-level connector configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// API credentials.
    pub credentials: Credentials,
    /// Connector domain name.
    pub domain: String,
    /// REST base URL.
    pub rest_url: String,
    /// WebSocket URL.
    pub ws_url: String,
    /// Trading pairs to subscribe and poll, in `BASE-QUOTE` form.
    pub trading_pairs: Vec<String>,
    /// Whether private endpoints are used at all.
    pub trading_required: bool,
    /// Number of book levels kept per side in snapshots.
    pub order_book_depth: usize,
    /// Reconciliation core settings.
    pub reconciler: ReconcilerConfig,
    /// Polling scheduler settings.
    pub poller: PollerConfig,
    /// Push listener settings.
    pub stream: StreamConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            domain: constants::DEFAULT_DOMAIN.to_string(),
            rest_url: constants::REST_URL.to_string(),
            ws_url: constants::WSS_URL.to_string(),
            trading_pairs: Vec::new(),
            trading_required: true,
            order_book_depth: 100,
            reconciler: ReconcilerConfig::default(),
            poller: PollerConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl ConnectorConfig {
    /// Creates a configuration with credentials and defaults elsewhere.
    #[must_use]
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            credentials: Credentials::new(api_key, api_secret),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON, filling missing fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if the document is malformed or fails
    /// validation.
    pub fn from_json_str(json: &str) -> ConnectorResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| ConnectorError::InvalidConfiguration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the trading pairs.
    #[must_use]
    pub fn with_trading_pairs<I, S>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trading_pairs = pairs.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the position mode.
    #[must_use]
    pub fn with_position_mode(mut self, mode: PositionMode) -> Self {
        self.reconciler.position_mode = mode;
        self
    }

    /// Sets the fee schedule.
    #[must_use]
    pub fn with_fee_schedule(mut self, schedule: FeeSchedule) -> Self {
        self.reconciler.fee_schedule = schedule;
        self
    }

    /// Sets the order book depth.
    #[must_use]
    pub fn with_order_book_depth(mut self, depth: usize) -> Self {
        self.order_book_depth = depth;
        self
    }

    /// Sets the REST and WebSocket URLs.
    #[must_use]
    pub fn with_urls(mut self, rest_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        self.rest_url = rest_url.into();
        self.ws_url = ws_url.into();
        self
    }

    /// Sets whether private endpoints are required.
    #[must_use]
    pub fn with_trading_required(mut self, required: bool) -> Self {
        self.trading_required = required;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if credentials are missing while trading
    /// is required, a trading pair is not in `BASE-QUOTE` form, the book depth
    /// is zero, a fee rate is negative, or a nested section is invalid.
    pub fn validate(&self) -> ConnectorResult<()> {
        if self.trading_required
            && (self.credentials.api_key.is_empty() || self.credentials.api_secret.is_empty())
        {
            return Err(ConnectorError::InvalidConfiguration(
                "api key and secret are required when trading is required".to_string(),
            ));
        }

        if let Some(pair) = self
            .trading_pairs
            .iter()
            .find(|pair| split_trading_pair(pair).is_none())
        {
            return Err(ConnectorError::InvalidConfiguration(format!(
                "trading pair must be BASE-QUOTE, got {pair}"
            )));
        }

        if self.order_book_depth == 0 {
            return Err(ConnectorError::InvalidConfiguration(
                "order_book_depth must be positive".to_string(),
            ));
        }

        if let FeeSchedule::Percentage { maker, taker } = self.reconciler.fee_schedule {
            if maker.is_sign_negative() || taker.is_sign_negative() {
                return Err(ConnectorError::InvalidConfiguration(
                    "fee rates must be non-negative".to_string(),
                ));
            }
        }

        self.poller.validate()?;
        self.stream.validate()?;
        Ok(())
    }
}

/// Splits `BASE-QUOTE` into its two assets.
#[must_use]
pub fn split_trading_pair(trading_pair: &str) -> Option<(&str, &str)> {
    let (base, quote) = trading_pair.split_once('-')?;
    if base.is_empty() || quote.is_empty() {
        None
    } else {
        Some((base, quote))
    }
}
