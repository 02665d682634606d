//! Outbound HTTP transport and bearer-token authentication.
//!
//! Every JSON-RPC exchange goes through [RpcTransport]. [AuthTransport] wraps another transport
//! and adds `Authorization: Bearer <token>` to a copy of each request; the caller's request is
//! borrowed and never modified, so one request value can be shared by concurrent callers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Lowercase header name used for bearer credentials.
pub const AUTHORIZATION: &str = "authorization";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Bearer credential for one endpoint. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// JSON POST request envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    /// Lowercase header names.
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn post_json(url: impl Into<String>, body: impl Into<String>) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            url: url.into(),
            headers,
            body: body.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Network exchange for one request. Implementations must be shareable across tasks.
#[async_trait]
pub trait RpcTransport: fmt::Debug + Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chaind/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Adds a bearer credential to every outgoing request, then delegates.
#[derive(Debug, Clone)]
pub struct AuthTransport {
    token: BearerToken,
    inner: Arc<dyn RpcTransport>,
}

impl AuthTransport {
    pub fn new(token: BearerToken, inner: Arc<dyn RpcTransport>) -> Self {
        Self { token, inner }
    }
}

#[async_trait]
impl RpcTransport for AuthTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let authed = request
            .clone()
            .with_header(AUTHORIZATION, self.token.header_value());
        self.inner.send(&authed).await
    }
}

/// Scripted transport for unit tests: answers JSON-RPC calls from a closure.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    type Handler = dyn Fn(&str, &Value) -> Result<Value, String> + Send + Sync;

    pub(crate) struct MockTransport {
        handler: Box<Handler>,
        pub(crate) requests: Mutex<Vec<HttpRequest>>,
    }

    impl fmt::Debug for MockTransport {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("MockTransport").finish_non_exhaustive()
        }
    }

    impl MockTransport {
        /// `handler(method, params)` returns the JSON-RPC `result` or an RPC error message.
        pub(crate) fn new(
            handler: impl Fn(&str, &Value) -> Result<Value, String> + Send + Sync + 'static,
        ) -> Self {
            Self {
                handler: Box::new(handler),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn methods(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| serde_json::from_str::<Value>(&r.body).ok())
                .filter_map(|v| v["method"].as_str().map(str::to_string))
                .collect()
        }
    }

    #[async_trait]
    impl RpcTransport for MockTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let body: Value = serde_json::from_str(&request.body)
                .map_err(|e| TransportError::Request(e.to_string()))?;
            let method = body["method"].as_str().unwrap_or_default();
            let reply = match (self.handler)(method, &body["params"]) {
                Ok(result) => json!({"jsonrpc": "2.0", "id": body["id"], "result": result}),
                Err(message) => json!({
                    "jsonrpc": "2.0",
                    "id": body["id"],
                    "error": {"code": -32000, "message": message}
                }),
            };
            Ok(HttpResponse::ok(reply.to_string()))
        }
    }
}
