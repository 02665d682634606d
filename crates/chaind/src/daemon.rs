//! Process driver: connections, background sync, bootstrap barrier, then the HTTP server.

use crate::blocktime::{BlockTimeIndex, SyncHandle};
use crate::bootstrap::{BootstrapOrchestrator, BootstrapReport};
use crate::config::{DaemonConfig, EndpointCatalog, EnvOverrides};
use crate::connections::{ConnectionManager, ConnectionRegistry};
use crate::indexer::{DomainIndexer, WarmupIndexer};
use crate::server::{router, AppState, ServerHandle, ServingGate};
use crate::status::StatusRegistry;
use crate::transport::RpcTransport;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Daemon {
    config: DaemonConfig,
    env: EnvOverrides,
    catalog: Arc<EndpointCatalog>,
    transport: Arc<dyn RpcTransport>,
    indexer: Option<Arc<dyn DomainIndexer>>,
    bind_addr: SocketAddr,
}

impl Daemon {
    pub fn new(
        config: DaemonConfig,
        env: EnvOverrides,
        catalog: EndpointCatalog,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        Self {
            config,
            env,
            catalog: Arc::new(catalog),
            transport,
            indexer: None,
            bind_addr,
        }
    }

    /// Replace the default [WarmupIndexer].
    pub fn with_indexer(mut self, indexer: Arc<dyn DomainIndexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.start(shutdown).await?.wait().await
    }

    /// Bootstrap every endpoint and start serving. Returns once the server is bound.
    pub async fn start(self, shutdown: CancellationToken) -> Result<RunningDaemon> {
        let connections: Arc<ConnectionRegistry> = Arc::new(
            ConnectionManager::new(&self.env, Arc::clone(&self.transport))
                .initialize(&self.catalog),
        );

        let statuses = Arc::new(StatusRegistry::new());
        let time_index = Arc::new(BlockTimeIndex::new(
            Arc::clone(&self.catalog),
            Arc::clone(&connections),
            self.config.block_time.clone(),
        ));
        let sync = time_index.start_background_sync(shutdown.child_token());

        let indexer: Arc<dyn DomainIndexer> = match self.indexer {
            Some(indexer) => indexer,
            None => Arc::new(WarmupIndexer::new(Arc::clone(&connections))),
        };
        let orchestrator = BootstrapOrchestrator::new(
            Arc::clone(&self.catalog),
            Arc::clone(&connections),
            Arc::clone(&statuses),
            Arc::clone(&time_index),
            indexer,
        )
        .with_timeout(self.config.bootstrap_timeout);

        let report = tokio::select! {
            report = orchestrator.run() => report,
            _ = shutdown.cancelled() => {
                sync.stop().await;
                anyhow::bail!("shutdown requested before bootstrap completed");
            }
        };
        info!(
            ready = report.ready(),
            degraded = report.degraded(),
            failed = report.failed(),
            "bootstrap complete"
        );

        let state = AppState {
            statuses: Arc::clone(&statuses),
            time_index: Arc::clone(&time_index),
            gate: orchestrator.gate(),
        };
        let serving = ServingGate::new(orchestrator.gate());
        let server = match serving
            .serve(self.bind_addr, router(state), shutdown.clone())
            .await
        {
            Ok(server) => server,
            Err(e) => {
                sync.stop().await;
                return Err(e);
            }
        };

        Ok(RunningDaemon {
            report,
            statuses,
            time_index,
            server,
            sync,
            shutdown,
        })
    }
}

/// A bootstrapped daemon with its server running.
pub struct RunningDaemon {
    report: BootstrapReport,
    statuses: Arc<StatusRegistry>,
    time_index: Arc<BlockTimeIndex>,
    server: ServerHandle,
    sync: SyncHandle,
    shutdown: CancellationToken,
}

impl RunningDaemon {
    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    pub fn report(&self) -> &BootstrapReport {
        &self.report
    }

    pub fn statuses(&self) -> &Arc<StatusRegistry> {
        &self.statuses
    }

    pub fn time_index(&self) -> &Arc<BlockTimeIndex> {
        &self.time_index
    }

    /// Wait for shutdown, stop the background sync and drain the server.
    pub async fn wait(self) -> Result<()> {
        self.shutdown.cancelled().await;
        info!("shutting down");
        self.sync.stop().await;
        let result = self.server.join().await;
        if let Err(e) = &result {
            warn!(reason = %e, "server exited with error");
        }
        result
    }
}
