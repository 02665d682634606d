//! Per-endpoint client registry.
//!
//! [ConnectionManager::initialize] dials every catalog endpoint once at startup and returns an
//! immutable [ConnectionRegistry]. An endpoint that fails to dial is logged and left out; lookups
//! for it return `None` and callers treat it as unavailable.

use crate::config::{EndpointCatalog, EndpointDescriptor, EndpointId, EnvOverrides};
use crate::multicall::MulticallClient;
use crate::rpc::{DialError, RpcClient};
use crate::transport::{BearerToken, RpcTransport};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("remote-call client: {0}")]
    Rpc(DialError),
    #[error("batched-call client: {0}")]
    Multicall(DialError),
}

/// Remote-call and batched-call clients for one endpoint. Always complete.
#[derive(Debug, Clone)]
pub struct Connection {
    pub rpc: Arc<RpcClient>,
    pub multicall: Arc<MulticallClient>,
    credential: Option<BearerToken>,
}

impl Connection {
    /// Credential the clients were dialed with (for other transports, e.g. WebSocket).
    pub fn credential(&self) -> Option<&BearerToken> {
        self.credential.as_ref()
    }
}

/// Read-only after construction.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<EndpointId, Connection>,
}

impl ConnectionRegistry {
    pub fn get(&self, id: EndpointId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn rpc(&self, id: EndpointId) -> Option<Arc<RpcClient>> {
        self.connections.get(&id).map(|c| Arc::clone(&c.rpc))
    }

    pub fn multicall(&self, id: EndpointId) -> Option<Arc<MulticallClient>> {
        self.connections.get(&id).map(|c| Arc::clone(&c.multicall))
    }

    pub fn contains(&self, id: EndpointId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Connected ids, ascending.
    pub fn ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<_> = self.connections.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Builds clients from catalog entries plus environment overrides.
#[derive(Debug)]
pub struct ConnectionManager<'a> {
    env: &'a EnvOverrides,
    transport: Arc<dyn RpcTransport>,
}

impl<'a> ConnectionManager<'a> {
    pub fn new(env: &'a EnvOverrides, transport: Arc<dyn RpcTransport>) -> Self {
        Self { env, transport }
    }

    /// Dial every endpoint in catalog order. Never fails as a whole.
    pub fn initialize(&self, catalog: &EndpointCatalog) -> ConnectionRegistry {
        let mut connections = HashMap::with_capacity(catalog.len());
        for endpoint in catalog.endpoints() {
            info!(chain_id = %endpoint.id, "dialing RPC");
            match self.connect(endpoint) {
                Ok(connection) => {
                    connections.insert(endpoint.id, connection);
                }
                Err(e) => {
                    error!(
                        chain_id = %endpoint.id,
                        reason = %e,
                        "failed to connect to node, endpoint unavailable"
                    );
                }
            }
        }
        info!(connected = connections.len(), total = catalog.len(), "connection registry ready");
        ConnectionRegistry { connections }
    }

    fn connect(&self, endpoint: &EndpointDescriptor) -> Result<Connection, ConnectError> {
        let credential = self.env.auth_token(endpoint.id);
        let rpc_url = self.env.rpc_url(endpoint.id).unwrap_or(&endpoint.rpc_url);
        let rpc = RpcClient::dial(
            endpoint.id,
            rpc_url,
            Arc::clone(&self.transport),
            credential.clone(),
        )
        .map_err(ConnectError::Rpc)?;

        let multicall_url = self.env.multicall_url(endpoint.id).unwrap_or(rpc_url);
        let multicall_rpc = RpcClient::dial(
            endpoint.id,
            multicall_url,
            Arc::clone(&self.transport),
            credential.clone(),
        )
        .map_err(ConnectError::Multicall)?;
        debug!(
            chain_id = %endpoint.id,
            authenticated = credential.is_some(),
            multicall_override = multicall_url != rpc_url,
            "clients built"
        );

        Ok(Connection {
            rpc: Arc::new(rpc),
            multicall: Arc::new(MulticallClient::new(
                multicall_rpc,
                endpoint.multicall_address,
                endpoint.max_batch_size,
            )),
            credential,
        })
    }
}
