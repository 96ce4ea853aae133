//! Transport collaborator interface.
//!
//! The connector does not implement HTTP or WebSocket I/O. Hosts plug their
//! own client in by implementing [`RestTransport`] and [`WsTransport`]; the
//! transport is responsible for throttling (keyed by
//! [`RestRequest::limit_id`]), retries of transient failures, and applying the
//! authentication headers for requests with `auth_required` set (see
//! [`DecibelAuth::rest_headers`](crate::auth::DecibelAuth::rest_headers)).
//!
//! [`mock`] provides scripted implementations for tests and demos.

use async_trait::async_trait;
use serde_json::Value;

use crate::types::error::ConnectorResult;

/// Scripted transports for tests and demos.
pub mod mock;

pub use mock::{MockRestTransport, MockWsTransport, WsScript};

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl RestMethod {
    /// Upper-case method name as signed.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for RestMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A REST request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    /// HTTP method.
    pub method: RestMethod,
    /// Path relative to the REST base URL, e.g. `/v1/orders/42`.
    pub path: String,
    /// Query parameters.
    pub params: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Whether the request must be signed.
    pub auth_required: bool,
    /// Rate limit bucket id.
    pub limit_id: &'static str,
}

impl RestRequest {
    /// Creates a request with no params, no body and no auth.
    #[must_use]
    pub fn new(method: RestMethod, path: impl Into<String>, limit_id: &'static str) -> Self {
        Self {
            method,
            path: path.into(),
            params: Vec::new(),
            body: None,
            auth_required: false,
            limit_id,
        }
    }

    /// Shorthand for a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>, limit_id: &'static str) -> Self {
        Self::new(RestMethod::Get, path, limit_id)
    }

    /// Shorthand for a POST request.
    #[must_use]
    pub fn post(path: impl Into<String>, limit_id: &'static str) -> Self {
        Self::new(RestMethod::Post, path, limit_id)
    }

    /// Shorthand for a DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>, limit_id: &'static str) -> Self {
        Self::new(RestMethod::Delete, path, limit_id)
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Marks the request as requiring a signature.
    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.auth_required = true;
        self
    }

    /// Full URL for a given base.
    #[must_use]
    pub fn url(&self, base_url: &str) -> String {
        let mut url = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        if !self.params.is_empty() {
            let query: Vec<String> = self
                .params
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

/// Executes REST requests against the exchange.
#[async_trait]
pub trait RestTransport: Send + Sync {
    /// Executes a request and returns the decoded JSON response.
    async fn execute(&self, request: RestRequest) -> ConnectorResult<Value>;
}

/// An open WebSocket session yielding JSON frames.
#[async_trait]
pub trait WsSession: Send {
    /// Sends a JSON frame.
    async fn send(&mut self, payload: Value) -> ConnectorResult<()>;

    /// Next JSON frame; `None` once the connection is closed.
    async fn next_frame(&mut self) -> Option<ConnectorResult<Value>>;

    /// Closes the session.
    async fn close(&mut self) -> ConnectorResult<()> {
        Ok(())
    }
}

/// Opens WebSocket sessions.
#[async_trait]
pub trait WsTransport: Send + Sync {
    /// Connects to `url`.
    async fn connect(&self, url: &str) -> ConnectorResult<Box<dyn WsSession>>;
}
