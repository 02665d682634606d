//! JSON-RPC client for one endpoint.

use crate::config::EndpointId;
use crate::transport::{AuthTransport, BearerToken, HttpRequest, RpcTransport, TransportError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Dial failure: the client could not be built for the given URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DialError {
    #[error("invalid RPC URL: {0}")]
    InvalidUrl(String),
    #[error("unsupported URL scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Remote-call client. Cheap to share behind `Arc`; safe for concurrent use.
#[derive(Debug)]
pub struct RpcClient {
    endpoint: EndpointId,
    url: String,
    transport: Arc<dyn RpcTransport>,
    authenticated: bool,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Validate `url` and build a client. With a token the transport is wrapped in
    /// [AuthTransport]; without one the transport is used as is. No network I/O.
    pub fn dial(
        endpoint: EndpointId,
        url: &str,
        transport: Arc<dyn RpcTransport>,
        token: Option<BearerToken>,
    ) -> Result<Self, DialError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| DialError::InvalidUrl(e.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(DialError::UnsupportedScheme(other.to_string())),
        }
        let authenticated = token.is_some();
        let transport: Arc<dyn RpcTransport> = match token {
            Some(token) => Arc::new(AuthTransport::new(token, transport)),
            None => transport,
        };
        Ok(Self {
            endpoint,
            url: url.to_string(),
            transport,
            authenticated,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// True when requests carry a bearer credential.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        });
        let request = HttpRequest::post_json(&self.url, body.to_string())
            .with_timeout(self.request_timeout);
        let response = self.transport.send(&request).await?;
        if !response.is_success() {
            return Err(RpcError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let json: Value =
            serde_json::from_str(&response.body).map_err(|e| RpcError::Decode(e.to_string()))?;
        if let Some(err) = json.get("error") {
            return Err(RpcError::Rpc(err.to_string()));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| RpcError::Decode("missing result".into()))
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_chainId", json!([])).await?;
        quantity(&result, "chainId")
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let result = self.request("eth_blockNumber", json!([])).await?;
        quantity(&result, "blockNumber")
    }

    /// Unix timestamp (seconds) of block `number`.
    pub async fn block_timestamp(&self, number: u64) -> Result<u64, RpcError> {
        let block = self
            .request("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?;
        if block.is_null() {
            return Err(RpcError::Decode(format!("block {number} not found")));
        }
        quantity(&block["timestamp"], "timestamp")
    }

    /// `eth_call` against `latest`.
    pub async fn call(&self, to: &[u8; 20], calldata: &[u8]) -> Result<Vec<u8>, RpcError> {
        let params = json!([{
            "to": format!("0x{}", hex::encode(to)),
            "data": format!("0x{}", hex::encode(calldata)),
        }, "latest"]);
        let result = self.request("eth_call", params).await?;
        let s = result
            .as_str()
            .ok_or_else(|| RpcError::Decode("eth_call result not string".into()))?;
        hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| RpcError::Decode(e.to_string()))
    }
}

/// Parse a hex quantity (`"0x1a"`).
pub(crate) fn quantity(value: &Value, what: &str) -> Result<u64, RpcError> {
    let s = value
        .as_str()
        .ok_or_else(|| RpcError::Decode(format!("{what} not string")))?;
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| RpcError::Decode(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::AUTHORIZATION;

    fn client(mock: Arc<MockTransport>, token: Option<BearerToken>) -> RpcClient {
        RpcClient::dial(EndpointId(1), "http://node.test", mock, token).unwrap()
    }

    #[test]
    fn dial_rejects_bad_urls() {
        let mock = Arc::new(MockTransport::new(|_, _| Ok(Value::Null)));
        assert!(matches!(
            RpcClient::dial(EndpointId(1), "not a url", mock.clone(), None),
            Err(DialError::InvalidUrl(_))
        ));
        assert_eq!(
            RpcClient::dial(EndpointId(1), "ftp://node", mock, None).unwrap_err(),
            DialError::UnsupportedScheme("ftp".into())
        );
    }

    #[tokio::test]
    async fn block_number_and_chain_id_parse_hex() {
        let mock = Arc::new(MockTransport::new(|method, _| match method {
            "eth_blockNumber" => Ok(json!("0x10")),
            "eth_chainId" => Ok(json!("0x1")),
            _ => Err("unexpected".into()),
        }));
        let c = client(mock, None);
        assert_eq!(c.block_number().await.unwrap(), 16);
        assert_eq!(c.chain_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rpc_error_member_is_surfaced() {
        let mock = Arc::new(MockTransport::new(|_, _| Err("execution reverted".into())));
        let err = client(mock, None).block_number().await.unwrap_err();
        assert!(matches!(err, RpcError::Rpc(ref m) if m.contains("execution reverted")));
    }

    #[tokio::test]
    async fn block_timestamp_requests_hex_number() {
        let mock = Arc::new(MockTransport::new(|method, params| {
            assert_eq!(method, "eth_getBlockByNumber");
            assert_eq!(params[0], json!("0xff"));
            Ok(json!({"number": "0xff", "timestamp": "0x64"}))
        }));
        assert_eq!(client(mock, None).block_timestamp(255).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn missing_block_is_decode_error() {
        let mock = Arc::new(MockTransport::new(|_, _| Ok(Value::Null)));
        assert!(matches!(
            client(mock, None).block_timestamp(1).await,
            Err(RpcError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn token_selects_authenticated_path() {
        let mock = Arc::new(MockTransport::new(|_, _| Ok(json!("0x1"))));
        let plain = client(mock.clone(), None);
        let authed = client(mock.clone(), Some(BearerToken::new("t")));
        assert!(!plain.is_authenticated());
        assert!(authed.is_authenticated());

        plain.chain_id().await.unwrap();
        authed.chain_id().await.unwrap();
        let sent = mock.requests.lock().unwrap();
        assert_eq!(sent[0].header(AUTHORIZATION), None);
        assert_eq!(sent[1].header(AUTHORIZATION), Some("Bearer t"));
    }

    #[tokio::test]
    async fn call_encodes_target_and_data() {
        let mock = Arc::new(MockTransport::new(|_, params| {
            assert_eq!(params[0]["to"], json!(format!("0x{}", "11".repeat(20))));
            assert_eq!(params[0]["data"], json!("0xdeadbeef"));
            assert_eq!(params[1], json!("latest"));
            Ok(json!("0x0102"))
        }));
        let out = client(mock, None)
            .call(&[0x11; 20], &[0xde, 0xad, 0xbe, 0xef])
            .await
            .unwrap();
        assert_eq!(out, vec![1, 2]);
    }
}
