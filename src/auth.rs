//! Request signing.
//!
//! Every private REST request and the WebSocket session login carry an
//! HMAC-SHA256 signature over `timestamp + METHOD + path + body`, hex encoded.
//!
//! # Example
//!
//! ```rust
//! use decibel_perp_rs::auth::sign;
//!
//! let get = sign("secret", "1700000000000", "GET", "/v1/orders", "");
//! let post = sign("secret", "1700000000000", "POST", "/v1/orders", "");
//! assert_ne!(get, post);
//! assert_eq!(get.len(), 64);
//! ```

use std::collections::BTreeMap;

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

use crate::config::Credentials;
use crate::constants::WS_AUTH_PATH;
use crate::transport::RestMethod;
use crate::types::time::SharedClock;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key.
pub const HEADER_ACCESS_KEY: &str = "X-ACCESS-KEY";
/// Header carrying the millisecond timestamp that was signed.
pub const HEADER_ACCESS_TIMESTAMP: &str = "X-ACCESS-TIMESTAMP";
/// Header carrying the hex signature.
pub const HEADER_ACCESS_SIGN: &str = "X-ACCESS-SIGN";

/// Computes `hex(HMAC_SHA256(secret, timestamp + method + path + body))`.
#[must_use]
pub fn sign(secret: &str, timestamp: &str, method: &str, path: &str, body: &str) -> String {
    let mut mac = <HmacSha256 as KeyInit>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!());
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Extracts the signed path from a request URL.
///
/// The exchange signs everything from the `/v1` prefix onward (query string
/// included). URLs without that prefix fall back to their path component.
#[must_use]
pub fn request_path(url: &str) -> &str {
    if let Some(index) = url.find("/v1") {
        return &url[index..];
    }
    match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |index| &rest[index..]),
        None => url,
    }
}

/// Headers and the exact body bytes that were signed.
///
/// The transport must send `body` verbatim; re-serializing the JSON value
/// could reorder keys and invalidate the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Authentication headers plus content type.
    pub headers: Vec<(&'static str, String)>,
    /// Compact JSON body, if any.
    pub body: Option<String>,
}

impl SignedRequest {
    /// Returns the value of a header by name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Authenticator bound to a set of credentials and a clock.
#[derive(Clone)]
pub struct DecibelAuth {
    credentials: Credentials,
    clock: SharedClock,
}

impl DecibelAuth {
    /// Creates an authenticator.
    #[must_use]
    pub fn new(credentials: Credentials, clock: SharedClock) -> Self {
        Self { credentials, clock }
    }

    /// API key in use.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    fn timestamp(&self) -> String {
        self.clock.now_ms().to_string()
    }

    /// Signs a REST request at the current clock time.
    #[must_use]
    pub fn rest_headers(&self, method: RestMethod, url: &str, body: Option<&Value>) -> SignedRequest {
        let timestamp = self.timestamp();
        let body = body.map(Value::to_string);
        let signature = sign(
            &self.credentials.api_secret,
            &timestamp,
            method.as_str(),
            request_path(url),
            body.as_deref().unwrap_or(""),
        );

        SignedRequest {
            headers: vec![
                (HEADER_ACCESS_KEY, self.credentials.api_key.clone()),
                (HEADER_ACCESS_TIMESTAMP, timestamp),
                (HEADER_ACCESS_SIGN, signature),
                ("Content-Type", "application/json".to_string()),
            ],
            body,
        }
    }

    /// Builds the WebSocket login frame: `{"op":"auth","args":[key, ts, sig]}`.
    #[must_use]
    pub fn ws_auth_frame(&self) -> Value {
        let timestamp = self.timestamp();
        let signature = sign(
            &self.credentials.api_secret,
            &timestamp,
            RestMethod::Get.as_str(),
            WS_AUTH_PATH,
            "",
        );
        json!({
            "op": "auth",
            "args": [self.credentials.api_key, timestamp, signature],
        })
    }

    /// Adds a `timestamp` parameter, using the clock when none is given.
    pub fn add_auth_to_params(&self, params: &mut BTreeMap<String, String>, timestamp: Option<u64>) {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now_ms());
        params.insert("timestamp".to_string(), timestamp.to_string());
    }
}

impl std::fmt::Debug for DecibelAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecibelAuth")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::time::ManualClock;
    use std::sync::Arc;

    fn test_auth() -> DecibelAuth {
        DecibelAuth::new(
            Credentials::new("test_key", "test_secret"),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    #[test]
    fn test_sign_matches_manual_hmac() {
        let mut mac = <HmacSha256 as KeyInit>::new_from_slice(b"test_secret").unwrap();
        mac.update(b"1700000000000GET/v1/account/overview");
        let expected = hex::encode(mac.finalize().into_bytes());

        let signature = sign("test_secret", "1700000000000", "GET", "/v1/account/overview", "");
        assert_eq!(signature, expected);
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign("s", "1", "POST", "/v1/orders", "{\"a\":1}");
        let b = sign("s", "1", "POST", "/v1/orders", "{\"a\":1}");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sign_changes_with_every_input() {
        let base = sign("s", "1", "GET", "/v1/orders", "");
        assert_ne!(base, sign("t", "1", "GET", "/v1/orders", ""));
        assert_ne!(base, sign("s", "2", "GET", "/v1/orders", ""));
        assert_ne!(base, sign("s", "1", "POST", "/v1/orders", ""));
        assert_ne!(base, sign("s", "1", "GET", "/v1/fills", ""));
        assert_ne!(base, sign("s", "1", "GET", "/v1/orders", "{}"));
    }

    #[test]
    fn test_request_path() {
        assert_eq!(
            request_path("https://api.decibel.trade/v1/account/overview"),
            "/v1/account/overview"
        );
        assert_eq!(
            request_path("https://api.decibel.trade/v1/account/fills?orderId=7"),
            "/v1/account/fills?orderId=7"
        );
        assert_eq!(request_path("https://example.com/other"), "/other");
        assert_eq!(request_path("https://example.com"), "/");
        assert_eq!(request_path("/v1/orders"), "/v1/orders");
    }

    #[test]
    fn test_rest_headers() {
        let auth = test_auth();
        let signed = auth.rest_headers(
            RestMethod::Get,
            "https://api.decibel.trade/v1/account/overview",
            None,
        );

        assert_eq!(signed.header(HEADER_ACCESS_KEY), Some("test_key"));
        assert_eq!(signed.header(HEADER_ACCESS_TIMESTAMP), Some("1700000000000"));
        assert_eq!(
            signed.header(HEADER_ACCESS_SIGN),
            Some(sign("test_secret", "1700000000000", "GET", "/v1/account/overview", "").as_str())
        );
        assert!(signed.body.is_none());
    }

    #[test]
    fn test_rest_headers_sign_compact_body() {
        let auth = test_auth();
        let body = json!({"market": "BTC-USD"});
        let signed = auth.rest_headers(RestMethod::Post, "https://api.decibel.trade/v1/orders", Some(&body));

        assert_eq!(signed.body.as_deref(), Some("{\"market\":\"BTC-USD\"}"));
        let expected = sign(
            "test_secret",
            "1700000000000",
            "POST",
            "/v1/orders",
            "{\"market\":\"BTC-USD\"}",
        );
        assert_eq!(signed.header(HEADER_ACCESS_SIGN), Some(expected.as_str()));
    }

    #[test]
    fn test_ws_auth_frame() {
        let auth = test_auth();
        let frame = auth.ws_auth_frame();

        assert_eq!(frame["op"], "auth");
        assert_eq!(frame["args"][0], "test_key");
        assert_eq!(frame["args"][1], "1700000000000");
        let expected = sign("test_secret", "1700000000000", "GET", "/realtime", "");
        assert_eq!(frame["args"][2], expected.as_str());
    }

    #[test]
    fn test_add_auth_to_params() {
        let auth = test_auth();
        let mut params = BTreeMap::from([("market".to_string(), "BTC-USD".to_string())]);
        auth.add_auth_to_params(&mut params, None);
        assert_eq!(params.get("timestamp").map(String::as_str), Some("1700000000000"));

        auth.add_auth_to_params(&mut params, Some(42));
        assert_eq!(params.get("timestamp").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", test_auth());
        assert!(!rendered.contains("test_secret"));
    }
}
