//! Scripted transports.
//!
//! These replay canned responses; they do not model exchange behavior.
//!
//! # Example
//!
//! ```rust
//! use decibel_perp_rs::transport::{MockRestTransport, RestMethod, RestRequest, RestTransport};
//! use serde_json::json;
//!
//! # tokio_test_block(async {
//! let transport = MockRestTransport::new();
//! transport.respond(RestMethod::Get, "/v1/time", json!({"serverTime": 1}));
//!
//! let response = transport
//!     .execute(RestRequest::get("/v1/time", "/v1/time"))
//!     .await
//!     .unwrap();
//! assert_eq!(response["serverTime"], 1);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RestMethod, RestRequest, RestTransport, WsSession, WsTransport};
use crate::types::error::{ConnectorError, ConnectorResult};

type RouteKey = (RestMethod, String);

#[derive(Default)]
struct Route {
    queued: VecDeque<ConnectorResult<Value>>,
    sticky: Option<ConnectorResult<Value>>,
    delay: Option<Duration>,
}

/// REST transport answering from a table of canned responses.
///
/// Responses queued with [`respond_once`](Self::respond_once) are consumed in
/// order before the sticky response set by [`respond`](Self::respond) or
/// [`fail`](Self::fail). Unrouted requests fail with a transport error.
#[derive(Default)]
pub struct MockRestTransport {
    routes: Mutex<HashMap<RouteKey, Route>>,
    requests: Mutex<Vec<RestRequest>>,
}

impl MockRestTransport {
    /// Creates an empty transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_route<R>(&self, method: RestMethod, path: &str, f: impl FnOnce(&mut Route) -> R) -> R {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        f(routes.entry((method, path.to_string())).or_default())
    }

    /// Answers every request to `path` with `response`.
    pub fn respond(&self, method: RestMethod, path: &str, response: Value) {
        self.with_route(method, path, |route| route.sticky = Some(Ok(response)));
    }

    /// Answers the next request to `path` with `response`.
    pub fn respond_once(&self, method: RestMethod, path: &str, response: Value) {
        self.with_route(method, path, |route| route.queued.push_back(Ok(response)));
    }

    /// Fails every request to `path` with `error`.
    pub fn fail(&self, method: RestMethod, path: &str, error: ConnectorError) {
        self.with_route(method, path, |route| route.sticky = Some(Err(error)));
    }

    /// Delays every response on `path`.
    pub fn delay(&self, method: RestMethod, path: &str, delay: Duration) {
        self.with_route(method, path, |route| route.delay = Some(delay));
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RestRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of requests received for a path.
    #[must_use]
    pub fn request_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|request| request.path == path)
            .count()
    }
}

#[async_trait]
impl RestTransport for MockRestTransport {
    async fn execute(&self, request: RestRequest) -> ConnectorResult<Value> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let (response, delay) = self.with_route(request.method, &request.path, |route| {
            let response = route.queued.pop_front().or_else(|| route.sticky.clone());
            (response, route.delay)
        });

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        response.unwrap_or_else(|| {
            Err(ConnectorError::Transport(format!(
                "no route for {} {}",
                request.method, request.path
            )))
        })
    }
}

/// Script for one WebSocket connection attempt.
#[derive(Debug, Clone)]
pub enum WsScript {
    /// The connection attempt fails.
    Refuse(ConnectorError),
    /// The connection yields these frames, then closes.
    Frames(Vec<ConnectorResult<Value>>),
    /// The connection yields these frames, then stays open without traffic.
    FramesThenIdle(Vec<ConnectorResult<Value>>),
}

/// WebSocket transport replaying one [`WsScript`] per connection attempt.
///
/// Once the scripts are exhausted every further attempt is refused.
#[derive(Default)]
pub struct MockWsTransport {
    scripts: Mutex<VecDeque<WsScript>>,
    sent: Arc<Mutex<Vec<Value>>>,
    connects: Mutex<usize>,
}

impl MockWsTransport {
    /// Creates a transport with the given connection scripts.
    #[must_use]
    pub fn new(scripts: impl IntoIterator<Item = WsScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Frames sent by clients across all sessions.
    #[must_use]
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of connection attempts.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        *self.connects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl WsTransport for MockWsTransport {
    async fn connect(&self, url: &str) -> ConnectorResult<Box<dyn WsSession>> {
        *self.connects.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match script {
            Some(WsScript::Refuse(err)) => Err(err),
            Some(WsScript::Frames(frames)) => Ok(Box::new(MockWsSession {
                frames: frames.into(),
                idle_when_drained: false,
                sent: Arc::clone(&self.sent),
            })),
            Some(WsScript::FramesThenIdle(frames)) => Ok(Box::new(MockWsSession {
                frames: frames.into(),
                idle_when_drained: true,
                sent: Arc::clone(&self.sent),
            })),
            None => Err(ConnectorError::Transport(format!("connection refused: {url}"))),
        }
    }
}

struct MockWsSession {
    frames: VecDeque<ConnectorResult<Value>>,
    idle_when_drained: bool,
    sent: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl WsSession for MockWsSession {
    async fn send(&mut self, payload: Value) -> ConnectorResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<ConnectorResult<Value>> {
        match self.frames.pop_front() {
            Some(frame) => Some(frame),
            None if self.idle_when_drained => std::future::pending().await,
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_queued_responses_precede_sticky() {
        let transport = MockRestTransport::new();
        transport.respond(RestMethod::Get, "/v1/time", json!({"n": 0}));
        transport.respond_once(RestMethod::Get, "/v1/time", json!({"n": 1}));

        let first = transport
            .execute(RestRequest::get("/v1/time", "/v1/time"))
            .await
            .unwrap();
        let second = transport
            .execute(RestRequest::get("/v1/time", "/v1/time"))
            .await
            .unwrap();

        assert_eq!(first["n"], 1);
        assert_eq!(second["n"], 0);
        assert_eq!(transport.request_count("/v1/time"), 2);
    }

    #[tokio::test]
    async fn test_unrouted_request_fails() {
        let transport = MockRestTransport::new();
        let result = transport
            .execute(RestRequest::post("/v1/orders", "/v1/orders"))
            .await;
        assert!(matches!(result, Err(ConnectorError::Transport(_))));
    }

    #[tokio::test]
    async fn test_ws_scripts() {
        let transport = MockWsTransport::new([
            WsScript::Refuse(ConnectorError::Transport("down".into())),
            WsScript::Frames(vec![Ok(json!({"channel": "orders"}))]),
        ]);

        assert!(transport.connect("wss://x").await.is_err());

        let mut session = transport.connect("wss://x").await.unwrap();
        session.send(json!({"op": "subscribe"})).await.unwrap();
        assert!(session.next_frame().await.is_some());
        assert!(session.next_frame().await.is_none());

        assert!(transport.connect("wss://x").await.is_err());
        assert_eq!(transport.connect_attempts(), 3);
        assert_eq!(transport.sent(), vec![json!({"op": "subscribe"})]);
    }
}
