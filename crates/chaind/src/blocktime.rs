//! Block-time index: per-endpoint map from block number to unix timestamp.
//!
//! Samples are the latest head block plus a daily grid: multiples of the endpoint's
//! `avg_blocks_per_day`, counted from genesis, so the same grid blocks recur across passes and
//! only new ones are fetched. [BlockTimeIndex::prime_endpoint] guarantees a short window during
//! bootstrap; the background sync started by [BlockTimeIndex::start_background_sync] keeps the
//! head fresh and extends history up to `history_days`. Older heads and grid points past the
//! retention window are dropped. Both write through the same sharded map, so they never race
//! on an endpoint's samples.

use crate::config::{BlockTimeConfig, EndpointCatalog, EndpointId};
use crate::connections::ConnectionRegistry;
use crate::rpc::{RpcClient, RpcError};
use dashmap::DashMap;
use rand::Rng;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum TimeIndexError {
    #[error("endpoint {0} has no connection")]
    Unavailable(EndpointId),
    #[error("endpoint {0} is not in the catalog")]
    Unknown(EndpointId),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

#[derive(Debug)]
pub struct BlockTimeIndex {
    catalog: Arc<EndpointCatalog>,
    connections: Arc<ConnectionRegistry>,
    config: BlockTimeConfig,
    samples: DashMap<EndpointId, BTreeMap<u64, u64>>,
}

impl BlockTimeIndex {
    pub fn new(
        catalog: Arc<EndpointCatalog>,
        connections: Arc<ConnectionRegistry>,
        config: BlockTimeConfig,
    ) -> Self {
        Self {
            catalog,
            connections,
            config,
            samples: DashMap::new(),
        }
    }

    /// Ensure the head block and `prime_days` daily samples are present for `endpoint`.
    /// Returns the number of samples added.
    pub async fn prime_endpoint(&self, endpoint: EndpointId) -> Result<usize, TimeIndexError> {
        self.sync_window(endpoint, self.config.prime_days).await
    }

    /// One pass over every connected endpoint, extending history to `history_days`.
    /// Failures are logged and skipped. Returns the number of samples added.
    pub async fn sync_once(&self) -> usize {
        let mut added = 0;
        for id in self.catalog.ids() {
            if !self.connections.contains(id) {
                continue;
            }
            match self.sync_window(id, self.config.history_days).await {
                Ok(n) => added += n,
                Err(e) => warn!(chain_id = %id, reason = %e, "block time sync failed"),
            }
        }
        added
    }

    /// Spawn the background sync loop. The first pass starts immediately.
    pub fn start_background_sync(self: &Arc<Self>, cancel: CancellationToken) -> SyncHandle {
        let index = Arc::clone(self);
        let token = cancel.clone();
        let interval = self.config.sync_interval;
        let task = tokio::spawn(async move {
            info!("starting background block time sync");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    added = index.sync_once() => {
                        debug!(added, "block time sync pass complete");
                    }
                }
                let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..500));
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(interval + jitter) => {}
                }
            }
            info!("background block time sync stopped");
        });
        SyncHandle { cancel, task }
    }

    async fn sync_window(&self, endpoint: EndpointId, days: u64) -> Result<usize, TimeIndexError> {
        let rpc = self
            .connections
            .rpc(endpoint)
            .ok_or(TimeIndexError::Unavailable(endpoint))?;
        let descriptor = self
            .catalog
            .get(endpoint)
            .ok_or(TimeIndexError::Unknown(endpoint))?;
        let head = rpc.block_number().await?;
        let per_day = descriptor.avg_blocks_per_day;
        let added = self
            .fill(endpoint, &rpc, &sample_targets(head, per_day, days))
            .await?;
        self.prune(endpoint, head, per_day, days.max(self.config.history_days));
        Ok(added)
    }

    /// Drop heads older than `head` and grid points older than `days` days.
    fn prune(&self, endpoint: EndpointId, head: u64, per_day: u64, days: u64) {
        let Some(mut samples) = self.samples.get_mut(&endpoint) else {
            return;
        };
        if per_day == 0 {
            samples.retain(|block, _| *block >= head);
            return;
        }
        let floor = grid_anchor(head, per_day).saturating_sub(per_day.saturating_mul(days));
        samples.retain(|block, _| *block >= head || (*block >= floor && block % per_day == 0));
    }

    async fn fill(
        &self,
        endpoint: EndpointId,
        rpc: &RpcClient,
        blocks: &[u64],
    ) -> Result<usize, TimeIndexError> {
        let mut added = 0;
        for &block in blocks {
            if self.timestamp(endpoint, block).is_some() {
                continue;
            }
            let ts = rpc.block_timestamp(block).await?;
            self.record(endpoint, block, ts);
            added += 1;
        }
        Ok(added)
    }

    pub fn record(&self, endpoint: EndpointId, block: u64, timestamp: u64) {
        self.samples
            .entry(endpoint)
            .or_default()
            .insert(block, timestamp);
        if self.config.verbose {
            info!(chain_id = %endpoint, block, timestamp, "block time recorded");
        } else {
            trace!(chain_id = %endpoint, block, timestamp, "block time recorded");
        }
    }

    /// Exact timestamp for a sampled block.
    pub fn timestamp(&self, endpoint: EndpointId, block: u64) -> Option<u64> {
        self.samples.get(&endpoint)?.get(&block).copied()
    }

    /// Timestamp for any block: exact when sampled, linear interpolation between the nearest
    /// samples, or the nearest sample when outside the sampled range.
    pub fn estimate_timestamp(&self, endpoint: EndpointId, block: u64) -> Option<u64> {
        let samples = self.samples.get(&endpoint)?;
        if let Some(ts) = samples.get(&block) {
            return Some(*ts);
        }
        let below = samples.range(..block).next_back();
        let above = samples
            .range((Bound::Excluded(block), Bound::Unbounded))
            .next();
        match (below, above) {
            (Some((&b0, &t0)), Some((&b1, &t1))) => {
                let span = u128::from(t1.saturating_sub(t0));
                let offset = span * u128::from(block - b0) / u128::from(b1 - b0);
                Some(t0 + offset as u64)
            }
            (Some((_, &t)), None) | (None, Some((_, &t))) => Some(t),
            (None, None) => None,
        }
    }

    /// Highest sampled (block, timestamp).
    pub fn latest(&self, endpoint: EndpointId) -> Option<(u64, u64)> {
        self.samples
            .get(&endpoint)?
            .iter()
            .next_back()
            .map(|(b, t)| (*b, *t))
    }

    pub fn len(&self, endpoint: EndpointId) -> usize {
        self.samples.get(&endpoint).map(|s| s.len()).unwrap_or(0)
    }
}

/// `head` plus the grid points `anchor, anchor - per_day, ..` for `days` days back, where
/// `anchor` is the highest multiple of `blocks_per_day` not above `head`. Stops at genesis.
pub fn sample_targets(head: u64, blocks_per_day: u64, days: u64) -> Vec<u64> {
    let mut targets = vec![head];
    if blocks_per_day == 0 {
        return targets;
    }
    let anchor = grid_anchor(head, blocks_per_day);
    for day in 0..=days {
        match blocks_per_day
            .checked_mul(day)
            .and_then(|back| anchor.checked_sub(back))
        {
            Some(block) if block == head => {}
            Some(block) => targets.push(block),
            None => break,
        }
    }
    targets
}

fn grid_anchor(head: u64, blocks_per_day: u64) -> u64 {
    head - head % blocks_per_day
}

/// Lifecycle handle for the background sync task.
#[derive(Debug)]
pub struct SyncHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the loop to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(reason = %e, "background block time sync ended abnormally");
        }
    }
}
