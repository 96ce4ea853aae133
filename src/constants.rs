//! Exchange endpoints, channel names and rate-limit table.
//!
//! Rate limiting itself belongs to the transport layer; the table here is the
//! data it needs, keyed by the same limit ids every [`RestRequest`] carries.
//!
//! [`RestRequest`]: crate::transport::RestRequest

/// Default connector domain name.
pub const DEFAULT_DOMAIN: &str = "decibel_perpetual";

/// REST base URL.
pub const REST_URL: &str = "https://api.decibel.trade";

/// WebSocket URL shared by public and private streams.
pub const WSS_URL: &str = "wss://stream.decibel.trade/ws";

// Public REST endpoints
pub const MARKETS_PATH_URL: &str = "/v1/markets";
pub const MARKET_PRICES_PATH_URL: &str = "/v1/market-prices";
pub const ORDER_BOOK_PATH_URL: &str = "/v1/markets/{market_name}/orderbook";
pub const FUNDING_INFO_PATH_URL: &str = "/v1/markets/{market_name}/funding";
pub const TRADES_PATH_URL: &str = "/v1/trades";
pub const SERVER_TIME_PATH_URL: &str = "/v1/time";

// Private REST endpoints
pub const ACCOUNT_OVERVIEW_PATH_URL: &str = "/v1/account/overview";
pub const ACCOUNT_POSITIONS_PATH_URL: &str = "/v1/account/positions";
pub const OPEN_ORDERS_PATH_URL: &str = "/v1/account/orders";
pub const CREATE_ORDER_PATH_URL: &str = "/v1/orders";
pub const CANCEL_ORDER_PATH_URL: &str = "/v1/orders/{order_id}";
pub const ORDER_STATUS_PATH_URL: &str = "/v1/orders/{order_id}";
pub const FILLS_PATH_URL: &str = "/v1/account/fills";
pub const FUNDING_HISTORY_PATH_URL: &str = "/v1/account/funding-history";
pub const SET_LEVERAGE_PATH_URL: &str = "/v1/account/leverage";

// WebSocket channels
pub const WS_ORDERBOOK_CHANNEL: &str = "orderbook";
pub const WS_TRADES_CHANNEL: &str = "trades";
pub const WS_ORDERS_CHANNEL: &str = "orders";
pub const WS_FILLS_CHANNEL: &str = "fills";
pub const WS_POSITIONS_CHANNEL: &str = "positions";
pub const WS_FUNDING_CHANNEL: &str = "funding";

/// Path signed for WebSocket session authentication.
pub const WS_AUTH_PATH: &str = "/realtime";

/// WebSocket heartbeat interval in seconds.
pub const HEARTBEAT_TIME_INTERVAL_SECS: u64 = 30;

/// Prefix of generated client order ids.
pub const CLIENT_ORDER_ID_PREFIX: &str = "decibel-";

/// Maximum client order id length accepted by the exchange.
pub const CLIENT_ORDER_ID_MAX_LENGTH: usize = 36;

/// Shared request weight budget per window.
pub const MAX_REQUEST_WEIGHT: u32 = 1200;

/// Limit id for requests without a dedicated bucket.
pub const NO_LIMIT_ID: &str = "NO_LIMIT";

/// Limit id of the shared weight pool.
pub const REQUEST_WEIGHT_ID: &str = "REQUEST_WEIGHT";

/// A rate limit bucket keyed by logical endpoint id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Logical limit id (usually the endpoint path template).
    pub limit_id: &'static str,
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length in seconds.
    pub interval_secs: u64,
    /// Parent bucket charged alongside this one, with its weight.
    pub linked: Option<(&'static str, u32)>,
}

impl RateLimit {
    const fn weighted(limit_id: &'static str, weight: u32) -> Self {
        Self {
            limit_id,
            limit: MAX_REQUEST_WEIGHT,
            interval_secs: 60,
            linked: Some((REQUEST_WEIGHT_ID, weight)),
        }
    }
}

/// Rate-limit table consumed by the transport's throttler.
pub const RATE_LIMITS: &[RateLimit] = &[
    RateLimit {
        limit_id: NO_LIMIT_ID,
        limit: MAX_REQUEST_WEIGHT,
        interval_secs: 60,
        linked: None,
    },
    RateLimit {
        limit_id: REQUEST_WEIGHT_ID,
        limit: MAX_REQUEST_WEIGHT,
        interval_secs: 60,
        linked: Some((NO_LIMIT_ID, 1)),
    },
    RateLimit::weighted(MARKETS_PATH_URL, 1),
    RateLimit::weighted(MARKET_PRICES_PATH_URL, 1),
    RateLimit::weighted(ORDER_BOOK_PATH_URL, 1),
    RateLimit::weighted(FUNDING_INFO_PATH_URL, 1),
    RateLimit::weighted(TRADES_PATH_URL, 1),
    RateLimit::weighted(ACCOUNT_OVERVIEW_PATH_URL, 5),
    RateLimit::weighted(ACCOUNT_POSITIONS_PATH_URL, 5),
    RateLimit::weighted(OPEN_ORDERS_PATH_URL, 5),
    RateLimit::weighted(CREATE_ORDER_PATH_URL, 10),
    RateLimit::weighted(CANCEL_ORDER_PATH_URL, 5),
    RateLimit::weighted(FILLS_PATH_URL, 5),
];

/// Looks up the rate limit bucket for a limit id.
#[must_use]
pub fn rate_limit(limit_id: &str) -> Option<&'static RateLimit> {
    RATE_LIMITS.iter().find(|limit| limit.limit_id == limit_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_lookup() {
        let create = rate_limit(CREATE_ORDER_PATH_URL).unwrap();
        assert_eq!(create.linked, Some((REQUEST_WEIGHT_ID, 10)));
        assert_eq!(create.interval_secs, 60);
        assert!(rate_limit(OPEN_ORDERS_PATH_URL).is_some());
        assert!(rate_limit("/v1/unknown").is_none());
    }
}
