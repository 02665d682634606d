//! HTTP surface, started only after the readiness gate opens.

use crate::blocktime::BlockTimeIndex;
use crate::config::EndpointId;
use crate::gate::ReadinessGate;
use crate::status::{StatusRegistry, UNKNOWN};
use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub statuses: Arc<StatusRegistry>,
    pub time_index: Arc<BlockTimeIndex>,
    pub gate: ReadinessGate,
}

#[derive(Debug, Serialize)]
struct StatusView {
    chain_id: u64,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cause: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready))
        .route("/status", get(all_statuses))
        .route("/status/:id", get(endpoint_status))
        .route("/blocktime/:id/:block", get(block_time))
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "chaind",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let open = state.gate.is_open();
    let code = if open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(json!({ "ready": open })))
}

async fn all_statuses(State(state): State<AppState>) -> impl IntoResponse {
    let map: BTreeMap<u64, &'static str> = state
        .statuses
        .snapshot()
        .into_iter()
        .map(|(id, status)| (id.0, status.as_str()))
        .collect();
    Json(map)
}

async fn endpoint_status(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.statuses.get(EndpointId(id)) {
        Some(status) => (
            StatusCode::OK,
            Json(StatusView {
                chain_id: id,
                status: status.as_str(),
                cause: status.cause().map(str::to_string),
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(StatusView {
                chain_id: id,
                status: UNKNOWN,
                cause: None,
            }),
        ),
    }
}

async fn block_time(
    State(state): State<AppState>,
    Path((id, block)): Path<(u64, u64)>,
) -> impl IntoResponse {
    let endpoint = EndpointId(id);
    match state.time_index.estimate_timestamp(endpoint, block) {
        Some(timestamp) => (
            StatusCode::OK,
            Json(json!({
                "chain_id": id,
                "block": block,
                "timestamp": timestamp,
                "exact": state.time_index.timestamp(endpoint, block).is_some(),
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "chain_id": id, "error": "no block time samples" })),
        ),
    }
}

/// Starts the serving interface once, after the gate has opened.
#[derive(Debug)]
pub struct ServingGate {
    gate: ReadinessGate,
    started: AtomicBool,
}

impl ServingGate {
    pub fn new(gate: ReadinessGate) -> Self {
        Self {
            gate,
            started: AtomicBool::new(false),
        }
    }

    /// Wait for the gate, bind `addr` and serve `router` until `shutdown` is cancelled.
    /// Only the first successful bind starts a server; a failed bind or a dropped call can be
    /// retried, and any call after a successful start fails.
    pub async fn serve(
        &self,
        addr: SocketAddr,
        router: Router,
        shutdown: CancellationToken,
    ) -> Result<ServerHandle> {
        if self.started.load(Ordering::SeqCst) {
            anyhow::bail!("serving interface already started");
        }
        self.gate.wait().await;

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("serving interface already started");
        }
        let local_addr = listener.local_addr().context("listener address")?;
        info!(addr = %local_addr, "starting HTTP server");

        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });
        Ok(ServerHandle { local_addr, task })
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the server to exit after shutdown.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .context("server task aborted")?
            .context("server error")
    }
}
