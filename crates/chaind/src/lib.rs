//! Multi-endpoint chain daemon: connects to every configured JSON-RPC endpoint, bootstraps each
//! one in parallel, and only then exposes its HTTP surface.
//!
//! - **ConnectionManager**: one remote-call client and one batched-call (Multicall3) client per
//!   endpoint, authenticated with a bearer token when `RPC_AUTH_TOKEN_FOR_<id>` is set.
//! - **BootstrapOrchestrator**: per-endpoint tasks (connectivity, block-time priming, indexer
//!   kickoff) behind a completion barrier; each endpoint ends Ready, Degraded or Failed.
//! - **BlockTimeIndex**: block → timestamp samples, primed during bootstrap and kept fresh by a
//!   cancellable background sync.
//! - **ServingGate**: binds the axum router once the [ReadinessGate] opens.

pub mod blocktime;
pub mod bootstrap;
pub mod config;
pub mod connections;
pub mod daemon;
pub mod gate;
pub mod indexer;
pub mod multicall;
pub mod rpc;
pub mod server;
pub mod status;
pub mod transport;

pub use blocktime::{BlockTimeIndex, SyncHandle, TimeIndexError};
pub use bootstrap::{BootstrapOrchestrator, BootstrapReport, Outcome};
pub use config::{
    BlockTimeConfig, ConfigError, DaemonConfig, EndpointCatalog, EndpointDescriptor, EndpointId,
    EnvOverrides,
};
pub use connections::{Connection, ConnectionManager, ConnectionRegistry};
pub use daemon::{Daemon, RunningDaemon};
pub use gate::ReadinessGate;
pub use indexer::{DomainIndexer, IndexerContext, WarmupIndexer};
pub use multicall::{Call, CallResult, MulticallClient, MulticallError};
pub use rpc::{DialError, RpcClient, RpcError};
pub use server::{router, AppState, ServerHandle, ServingGate};
pub use status::{Status, StatusChange, StatusRegistry};
pub use transport::{
    AuthTransport, BearerToken, HttpRequest, HttpResponse, ReqwestTransport, RpcTransport,
    TransportError,
};
