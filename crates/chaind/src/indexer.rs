//! Domain indexer seam, invoked once per endpoint at the end of bootstrap.

use crate::config::EndpointId;
use crate::connections::ConnectionRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Optional per-call state for [DomainIndexer::initialize_for_endpoint]. Bootstrap passes `None`.
#[derive(Debug, Clone, Default)]
pub struct IndexerContext {
    /// First block the indexer should consider. [WarmupIndexer] fails when the head is below it.
    pub start_block: Option<u64>,
}

/// Indexing logic for one endpoint. Must eventually return; may do arbitrary network work.
#[async_trait]
pub trait DomainIndexer: Send + Sync {
    async fn initialize_for_endpoint(
        &self,
        endpoint: EndpointId,
        context: Option<IndexerContext>,
    ) -> Result<()>;
}

/// Default indexer: warms both clients of an endpoint with one call each and checks that the
/// batched-call contract sees the same chain as the remote-call client.
#[derive(Debug)]
pub struct WarmupIndexer {
    connections: Arc<ConnectionRegistry>,
}

impl WarmupIndexer {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl DomainIndexer for WarmupIndexer {
    async fn initialize_for_endpoint(
        &self,
        endpoint: EndpointId,
        context: Option<IndexerContext>,
    ) -> Result<()> {
        let connection = self
            .connections
            .get(endpoint)
            .with_context(|| format!("endpoint {endpoint} has no connection"))?;
        let head = connection
            .rpc
            .block_number()
            .await
            .context("eth_blockNumber")?;
        let multicall_head = connection
            .multicall
            .block_number()
            .await
            .context("multicall getBlockNumber()")?;
        // Different nodes behind a load balancer may lag by a few blocks.
        if multicall_head.abs_diff(head) > 64 {
            anyhow::bail!("multicall head {multicall_head} far from RPC head {head}");
        }
        if let Some(start) = context.and_then(|c| c.start_block) {
            if head < start {
                anyhow::bail!("head {head} is below start block {start}");
            }
        }
        tracing::info!(chain_id = %endpoint, head, multicall_head, "clients warmed up");
        Ok(())
    }
}
