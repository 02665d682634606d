//! Common helpers for integration tests.
#![allow(dead_code)]

use alloy::primitives::U256;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chaind::config::EndpointDescriptor;
use chaind::{
    EndpointId, HttpRequest, HttpResponse, IndexerContext, DomainIndexer, RpcTransport,
    TransportError,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Head block reported by every mock node.
pub const HEAD: u64 = 10_000;

alloy::sol! {
    struct Call3 {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Result3 {
        bool success;
        bytes returnData;
    }

    function aggregate3(Call3[] calls) external payable returns (Result3[] returnData);

    function getBlockNumber() external view returns (uint256 blockNumber);
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chaind=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn descriptor(id: u64, rpc_url: &str) -> EndpointDescriptor {
    EndpointDescriptor {
        id: EndpointId(id),
        name: format!("chain-{id}"),
        rpc_url: rpc_url.to_string(),
        ws_url: None,
        can_use_websocket: false,
        multicall_address: [0xca; 20],
        max_block_range: 10_000,
        max_batch_size: 50,
        avg_blocks_per_day: 1_000,
    }
}

/// URL whose host encodes the chain id, understood by [RecordingTransport].
pub fn node_url(id: u64) -> String {
    format!("http://chain-{id}.test/rpc")
}

fn chain_from_url(url: &str) -> Option<u64> {
    url.split("chain-").nth(1)?.split('.').next()?.parse().ok()
}

/// Answers of a healthy node for `chain_id`. Block `n` has timestamp `n * 2`.
pub fn respond(chain_id: u64, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        "eth_chainId" => Ok(json!(format!("0x{chain_id:x}"))),
        "eth_blockNumber" => Ok(json!(format!("0x{HEAD:x}"))),
        "eth_getBlockByNumber" => {
            let raw = params[0].as_str().ok_or("missing block number")?;
            let n = u64::from_str_radix(raw.trim_start_matches("0x"), 16)
                .map_err(|e| e.to_string())?;
            Ok(json!({
                "number": format!("0x{n:x}"),
                "timestamp": format!("0x{:x}", n * 2)
            }))
        }
        "eth_call" => {
            let data = params[0]["data"].as_str().ok_or("missing data")?;
            let data = hex::decode(data.trim_start_matches("0x")).map_err(|e| e.to_string())?;
            let call = aggregate3Call::abi_decode(&data, true).map_err(|e| e.to_string())?;
            let block = getBlockNumberCall::abi_encode_returns(&(U256::from(HEAD),));
            let results: Vec<Result3> = call
                .calls
                .iter()
                .map(|_| Result3 {
                    success: true,
                    returnData: block.clone().into(),
                })
                .collect();
            let encoded = aggregate3Call::abi_encode_returns(&(results,));
            Ok(json!(format!("0x{}", hex::encode(encoded))))
        }
        other => Err(format!("method not supported: {other}")),
    }
}

/// In-memory transport: routes by the chain id in the URL and records every request as sent.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub requests: Mutex<Vec<HttpRequest>>,
    /// Chains whose requests fail with a connect error.
    pub unreachable: Vec<u64>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(ids: &[u64]) -> Self {
        Self {
            unreachable: ids.to_vec(),
            ..Self::default()
        }
    }

    pub fn sent_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RpcTransport for RecordingTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let chain = chain_from_url(&request.url)
            .ok_or_else(|| TransportError::Connect(format!("no route to {}", request.url)))?;
        if self.unreachable.contains(&chain) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let body: Value = serde_json::from_str(&request.body)
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let method = body["method"].as_str().unwrap_or_default();
        let reply = match respond(chain, method, &body["params"]) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": body["id"], "result": result}),
            Err(message) => json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "error": {"code": -32601, "message": message}
            }),
        };
        Ok(HttpResponse::ok(reply.to_string()))
    }
}

/// Indexer with per-endpoint delays, failures and panics.
#[derive(Debug, Default)]
pub struct ScriptedIndexer {
    pub delays: HashMap<EndpointId, Duration>,
    pub fail: Vec<EndpointId>,
    pub panic: Vec<EndpointId>,
    pub calls: Mutex<Vec<EndpointId>>,
}

impl ScriptedIndexer {
    pub fn finished(&self) -> Vec<EndpointId> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl DomainIndexer for ScriptedIndexer {
    async fn initialize_for_endpoint(
        &self,
        endpoint: EndpointId,
        _context: Option<IndexerContext>,
    ) -> Result<()> {
        if let Some(delay) = self.delays.get(&endpoint) {
            tokio::time::sleep(*delay).await;
        }
        if self.panic.contains(&endpoint) {
            panic!("indexer exploded for {endpoint}");
        }
        self.calls.lock().unwrap().push(endpoint);
        if self.fail.contains(&endpoint) {
            anyhow::bail!("index source offline");
        }
        Ok(())
    }
}

/// JSON-RPC node served over real HTTP, recording the Authorization header of each request.
pub struct MockNode {
    pub url: String,
    pub auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    shutdown: CancellationToken,
}

impl MockNode {
    pub async fn spawn(chain_id: u64) -> Result<Self> {
        let auth_headers = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/", post(handle_rpc))
            .with_state((chain_id, Arc::clone(&auth_headers)));
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .context("bind mock node")?;
        let url = format!("http://{}/", listener.local_addr()?);
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
        });
        Ok(Self {
            url,
            auth_headers,
            shutdown,
        })
    }

    pub fn seen_auth(&self) -> Vec<Option<String>> {
        self.auth_headers.lock().unwrap().clone()
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

type NodeState = (u64, Arc<Mutex<Vec<Option<String>>>>);

async fn handle_rpc(
    State((chain_id, auth_headers)): State<NodeState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    auth_headers.lock().unwrap().push(auth);
    let method = body["method"].as_str().unwrap_or_default();
    let reply = match respond(chain_id, method, &body["params"]) {
        Ok(result) => json!({"jsonrpc": "2.0", "id": body["id"], "result": result}),
        Err(message) => json!({
            "jsonrpc": "2.0",
            "id": body["id"],
            "error": {"code": -32601, "message": message}
        }),
    };
    Json(reply)
}
