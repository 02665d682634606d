//! Parallel per-endpoint bootstrap with a completion barrier.
//!
//! One task per catalog endpoint, each running, in order:
//!
//! 1. status → `Loading`
//! 2. connectivity check: WebSocket handshake when the endpoint allows it, then `eth_chainId`
//!    over HTTP
//! 3. block-time priming
//! 4. domain indexer kickoff
//!
//! and then recording a tagged [Outcome] in the [StatusRegistry]. The outcome is recorded even
//! when a step panics or the optional per-endpoint timeout fires. [BootstrapOrchestrator::run]
//! returns once every task has finished and opens the [ReadinessGate] exactly once.

use crate::blocktime::BlockTimeIndex;
use crate::config::{EndpointCatalog, EndpointDescriptor, EndpointId};
use crate::connections::{Connection, ConnectionRegistry};
use crate::gate::ReadinessGate;
use crate::indexer::DomainIndexer;
use crate::status::{Status, StatusRegistry};
use crate::transport::BearerToken;
use anyhow::{Context, Result};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tracing::{error, info, warn};

const DEFAULT_WS_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of one endpoint's bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    Degraded(String),
    Failed(String),
}

impl From<Outcome> for Status {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ready => Status::Ready,
            Outcome::Degraded(cause) => Status::Degraded(cause),
            Outcome::Failed(cause) => Status::Failed(cause),
        }
    }
}

/// Outcome of every endpoint after the barrier released.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub outcomes: BTreeMap<EndpointId, Outcome>,
}

impl BootstrapReport {
    pub fn get(&self, id: EndpointId) -> Option<&Outcome> {
        self.outcomes.get(&id)
    }

    pub fn ready(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Ready))
    }

    pub fn degraded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Degraded(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    fn count(&self, f: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| f(o)).count()
    }
}

/// State shared by all endpoint tasks.
struct Shared {
    connections: Arc<ConnectionRegistry>,
    statuses: Arc<StatusRegistry>,
    time_index: Arc<BlockTimeIndex>,
    indexer: Arc<dyn DomainIndexer>,
    timeout: Option<Duration>,
    ws_probe_timeout: Duration,
}

pub struct BootstrapOrchestrator {
    catalog: Arc<EndpointCatalog>,
    connections: Arc<ConnectionRegistry>,
    statuses: Arc<StatusRegistry>,
    time_index: Arc<BlockTimeIndex>,
    indexer: Arc<dyn DomainIndexer>,
    timeout: Option<Duration>,
    ws_probe_timeout: Duration,
    gate: ReadinessGate,
}

impl BootstrapOrchestrator {
    pub fn new(
        catalog: Arc<EndpointCatalog>,
        connections: Arc<ConnectionRegistry>,
        statuses: Arc<StatusRegistry>,
        time_index: Arc<BlockTimeIndex>,
        indexer: Arc<dyn DomainIndexer>,
    ) -> Self {
        Self {
            catalog,
            connections,
            statuses,
            time_index,
            indexer,
            timeout: None,
            ws_probe_timeout: DEFAULT_WS_PROBE_TIMEOUT,
            gate: ReadinessGate::new(),
        }
    }

    /// Bound each endpoint's bootstrap. A task that exceeds it is recorded as Degraded.
    pub fn with_timeout(mut self, limit: Option<Duration>) -> Self {
        self.timeout = limit;
        self
    }

    pub fn with_ws_probe_timeout(mut self, limit: Duration) -> Self {
        self.ws_probe_timeout = limit;
        self
    }

    /// Opened by [Self::run] after the last endpoint finishes.
    pub fn gate(&self) -> ReadinessGate {
        self.gate.clone()
    }

    /// Bootstrap every endpoint in parallel and wait for all of them.
    pub async fn run(&self) -> BootstrapReport {
        info!(
            count = self.catalog.len(),
            chains = ?self.catalog.ids(),
            "starting endpoint bootstrap"
        );
        let shared = Arc::new(Shared {
            connections: Arc::clone(&self.connections),
            statuses: Arc::clone(&self.statuses),
            time_index: Arc::clone(&self.time_index),
            indexer: Arc::clone(&self.indexer),
            timeout: self.timeout,
            ws_probe_timeout: self.ws_probe_timeout,
        });
        let mut tasks = JoinSet::new();
        for endpoint in self.catalog.endpoints() {
            tasks.spawn(bootstrap_endpoint(Arc::clone(&shared), endpoint.clone()));
        }

        info!("waiting for all endpoints to complete initial loading");
        let mut report = BootstrapReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    report.outcomes.insert(id, outcome);
                }
                Err(e) => error!(reason = %e, "bootstrap task aborted"),
            }
        }

        if self.gate.open() {
            info!(
                ready = report.ready(),
                degraded = report.degraded(),
                failed = report.failed(),
                "all endpoints initialized"
            );
        }
        report
    }
}

async fn bootstrap_endpoint(
    shared: Arc<Shared>,
    endpoint: EndpointDescriptor,
) -> (EndpointId, Outcome) {
    let id = endpoint.id;
    shared.statuses.set(id, Status::Loading);
    info!(chain_id = %id, "initializing endpoint");

    let steps = AssertUnwindSafe(run_steps(&shared, &endpoint)).catch_unwind();
    let outcome = match shared.timeout {
        Some(limit) => match timeout(limit, steps).await {
            Ok(result) => outcome_or_panic(result),
            Err(_) => Outcome::Degraded(format!("bootstrap timed out after {limit:?}")),
        },
        None => outcome_or_panic(steps.await),
    };

    shared.statuses.set(id, outcome.clone().into());
    match &outcome {
        Outcome::Ready => info!(chain_id = %id, "endpoint initialization completed"),
        Outcome::Degraded(cause) => {
            warn!(chain_id = %id, %cause, "endpoint initialized with errors")
        }
        Outcome::Failed(cause) => error!(chain_id = %id, %cause, "endpoint initialization failed"),
    }
    (id, outcome)
}

fn outcome_or_panic(result: Result<Outcome, Box<dyn Any + Send>>) -> Outcome {
    result.unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Outcome::Failed(format!("bootstrap panicked: {message}"))
    })
}

async fn run_steps(shared: &Shared, endpoint: &EndpointDescriptor) -> Outcome {
    let id = endpoint.id;
    let Some(connection) = shared.connections.get(id) else {
        return Outcome::Failed("no connection (dial failed at startup)".into());
    };
    let mut issues = Vec::new();

    info!(chain_id = %id, "confirming connectivity");
    match confirm_connectivity(endpoint, connection, shared.ws_probe_timeout).await {
        Ok(warnings) => issues.extend(warnings),
        Err(e) => return Outcome::Failed(format!("unreachable: {e:#}")),
    }

    info!(chain_id = %id, "initializing block timestamps");
    match shared.time_index.prime_endpoint(id).await {
        Ok(added) => info!(chain_id = %id, added, "block timestamps primed"),
        Err(e) => issues.push(format!("block time priming: {e}")),
    }

    info!(chain_id = %id, "starting indexer");
    if let Err(e) = shared.indexer.initialize_for_endpoint(id, None).await {
        issues.push(format!("indexer: {e:#}"));
    }

    if issues.is_empty() {
        Outcome::Ready
    } else {
        Outcome::Degraded(issues.join("; "))
    }
}

/// Returns non-fatal warnings; `Err` means the endpoint cannot be reached at all.
async fn confirm_connectivity(
    endpoint: &EndpointDescriptor,
    connection: &Connection,
    ws_timeout: Duration,
) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    if let Some(ws_url) = endpoint.websocket_url(connection.rpc.url()) {
        match probe_websocket(&ws_url, connection.credential(), ws_timeout).await {
            Ok(()) => info!(chain_id = %endpoint.id, "websocket connected"),
            Err(e) => {
                warn!(chain_id = %endpoint.id, reason = %e, "websocket unavailable, using HTTP");
                warnings.push(format!("websocket unavailable: {e:#}"));
            }
        }
    }
    let chain_id = connection.rpc.chain_id().await.context("eth_chainId")?;
    if chain_id != endpoint.id.0 {
        warnings.push(format!(
            "node reports chain id {chain_id}, expected {}",
            endpoint.id
        ));
    }
    Ok(warnings)
}

async fn probe_websocket(
    url: &str,
    credential: Option<&BearerToken>,
    limit: Duration,
) -> Result<()> {
    let mut request = url
        .into_client_request()
        .context("build websocket request")?;
    if let Some(token) = credential {
        let value =
            HeaderValue::from_str(&token.header_value()).context("authorization header")?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
    }
    let (mut stream, _) = timeout(limit, connect_async(request))
        .await
        .map_err(|_| anyhow::anyhow!("handshake timed out after {limit:?}"))?
        .context("websocket connect")?;
    let _ = stream.close(None).await;
    Ok(())
}
