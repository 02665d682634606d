//! Endpoint catalog and environment-driven configuration.

use crate::transport::BearerToken;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default port for the serving interface.
pub const DEFAULT_PORT: u16 = 8080;

/// Canonical Multicall3 deployment (same address on every EVM chain).
pub const MULTICALL3_ADDRESS: [u8; 20] = [
    0xca, 0x11, 0xbd, 0xe0, 0x59, 0x77, 0xb3, 0x63, 0x11, 0x67, 0x02, 0x88, 0x62, 0xbe, 0x2a, 0x17,
    0x39, 0x76, 0xca, 0x11,
];

const RPC_AUTH_TOKEN_PREFIX: &str = "RPC_AUTH_TOKEN_FOR_";
const RPC_URI_PREFIX: &str = "RPC_URI_FOR_";
const MULTICALL_URI_PREFIX: &str = "MULTICALL_RPC_URI_FOR_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("duplicate endpoint id {0} in catalog")]
    DuplicateEndpoint(EndpointId),

    #[error("endpoint {0} requested but not in catalog")]
    UnknownEndpoint(EndpointId),

    #[error("read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse catalog: {0}")]
    Json(#[from] serde_json::Error),
}

/// Numeric endpoint identity (the EVM chain id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EndpointId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Static description of one endpoint. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub id: EndpointId,
    pub name: String,
    /// HTTP JSON-RPC URL.
    pub rpc_url: String,
    /// Explicit WebSocket URL. When absent and `can_use_websocket` is set, it is derived from
    /// the RPC URL.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default)]
    pub can_use_websocket: bool,
    /// Multicall3 contract address (20 bytes).
    #[serde(with = "hex_address", default = "default_multicall_address")]
    pub multicall_address: [u8; 20],
    /// Max block range per eth_getLogs request.
    pub max_block_range: u64,
    /// Max calls per aggregate3 batch.
    pub max_batch_size: u64,
    /// Used to space block-time samples one day apart.
    pub avg_blocks_per_day: u64,
}

impl EndpointDescriptor {
    /// WebSocket URL for streaming connectivity, if this endpoint supports it.
    pub fn websocket_url(&self, rpc_url: &str) -> Option<String> {
        if !self.can_use_websocket {
            return None;
        }
        match &self.ws_url {
            Some(url) => Some(url.clone()),
            None if rpc_url.starts_with("http://") || rpc_url.starts_with("https://") => Some(
                rpc_url
                    .replacen("http://", "ws://", 1)
                    .replacen("https://", "wss://", 1),
            ),
            None => None,
        }
    }
}

fn default_multicall_address() -> [u8; 20] {
    MULTICALL3_ADDRESS
}

/// Parse a `0x`-prefixed (or bare) 20-byte hex address.
pub fn parse_address(s: &str) -> Result<[u8; 20], ConfigError> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| ConfigError::InvalidAddress(format!("{s}: {e}")))?;
    if bytes.len() != 20 {
        return Err(ConfigError::InvalidAddress(format!(
            "{s}: expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

mod hex_address {
    use super::*;

    pub fn serialize<S: Serializer>(addr: &[u8; 20], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(addr)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 20], D::Error> {
        let s = String::deserialize(d)?;
        parse_address(&s).map_err(serde::de::Error::custom)
    }
}

/// Immutable, ordered collection of endpoint descriptors with unique ids.
#[derive(Debug, Clone, Default)]
pub struct EndpointCatalog {
    endpoints: Vec<EndpointDescriptor>,
}

impl EndpointCatalog {
    pub fn new(endpoints: Vec<EndpointDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for endpoint in &endpoints {
            if !seen.insert(endpoint.id) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.id));
            }
        }
        Ok(Self { endpoints })
    }

    /// Catalog compiled into the binary.
    pub fn builtin() -> Self {
        let endpoint =
            |id: u64, name: &str, rpc_url: &str, max_batch_size: u64, avg_blocks_per_day: u64| {
                EndpointDescriptor {
                    id: EndpointId(id),
                    name: name.to_string(),
                    rpc_url: rpc_url.to_string(),
                    ws_url: None,
                    can_use_websocket: false,
                    multicall_address: MULTICALL3_ADDRESS,
                    max_block_range: 100_000_000,
                    max_batch_size,
                    avg_blocks_per_day,
                }
            };
        let mut filecoin_calibration = endpoint(
            314159,
            "filecoin-calibration",
            "https://api.calibration.node.glif.io/rpc/v1",
            i64::MAX as u64,
            1_440,
        );
        filecoin_calibration.max_block_range = 10_000;
        Self {
            endpoints: vec![
                endpoint(1, "ethereum", "https://eth.llamarpc.com", 500, 7_200),
                endpoint(10, "optimism", "https://mainnet.optimism.io", 500, 43_200),
                endpoint(137, "polygon", "https://polygon-rpc.com", 500, 43_200),
                endpoint(8453, "base", "https://mainnet.base.org", 500, 43_200),
                endpoint(42161, "arbitrum", "https://arb1.arbitrum.io/rpc", 500, 345_600),
                filecoin_calibration,
            ],
        }
    }

    /// Parse a JSON array of descriptors.
    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        let endpoints: Vec<EndpointDescriptor> = serde_json::from_str(s)?;
        Self::new(endpoints)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Keep only the listed ids, in catalog order.
    pub fn select(&self, ids: &[EndpointId]) -> Result<Self, ConfigError> {
        if let Some(missing) = ids.iter().find(|id| self.get(**id).is_none()) {
            return Err(ConfigError::UnknownEndpoint(*missing));
        }
        Ok(Self {
            endpoints: self
                .endpoints
                .iter()
                .filter(|e| ids.contains(&e.id))
                .cloned()
                .collect(),
        })
    }

    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    pub fn get(&self, id: EndpointId) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    pub fn ids(&self) -> Vec<EndpointId> {
        self.endpoints.iter().map(|e| e.id).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Snapshot of process environment variables. Values are never printed.
#[derive(Clone, Default)]
pub struct EnvOverrides {
    vars: HashMap<String, String>,
}

impl fmt::Debug for EnvOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvOverrides")
            .field("vars", &self.vars.len())
            .finish()
    }
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// `RPC_AUTH_TOKEN_FOR_<id>`.
    pub fn auth_token(&self, id: EndpointId) -> Option<BearerToken> {
        self.get(&format!("{RPC_AUTH_TOKEN_PREFIX}{id}"))
            .map(BearerToken::new)
    }

    /// `RPC_URI_FOR_<id>`.
    pub fn rpc_url(&self, id: EndpointId) -> Option<&str> {
        self.get(&format!("{RPC_URI_PREFIX}{id}"))
    }

    /// `MULTICALL_RPC_URI_FOR_<id>`.
    pub fn multicall_url(&self, id: EndpointId) -> Option<&str> {
        self.get(&format!("{MULTICALL_URI_PREFIX}{id}"))
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }
}

/// Block-time index tuning.
#[derive(Debug, Clone)]
pub struct BlockTimeConfig {
    /// Pause between background sync passes.
    pub sync_interval: Duration,
    /// Days of daily samples guaranteed by priming.
    pub prime_days: u64,
    /// Days of daily samples the background sync extends to.
    pub history_days: u64,
    /// Log every recorded sample at info level.
    pub verbose: bool,
}

impl Default for BlockTimeConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            prime_days: 7,
            history_days: 30,
            verbose: false,
        }
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub port: u16,
    pub catalog_path: Option<PathBuf>,
    /// Subset of endpoints to run; `None` runs the whole catalog.
    pub chains: Option<Vec<EndpointId>>,
    /// Per-endpoint bootstrap bound. `None` waits indefinitely.
    pub bootstrap_timeout: Option<Duration>,
    pub block_time: BlockTimeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            catalog_path: None,
            chains: None,
            bootstrap_timeout: None,
            block_time: BlockTimeConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_env(env: &EnvOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(port) = env.parse::<u16>("PORT")? {
            config.port = port;
        }
        config.catalog_path = env.get("CATALOG_PATH").map(PathBuf::from);
        if let Some(raw) = env.get("CHAINS") {
            let ids = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u64>().map(EndpointId).map_err(|_| ConfigError::InvalidValue {
                        key: "CHAINS".to_string(),
                        value: raw.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            config.chains = Some(ids);
        }
        config.bootstrap_timeout = env
            .parse::<u64>("BOOTSTRAP_TIMEOUT_SECS")?
            .map(Duration::from_secs);
        if let Some(secs) = env.parse::<u64>("BLOCKTIME_SYNC_INTERVAL_SECS")? {
            config.block_time.sync_interval = Duration::from_secs(secs);
        }
        config.block_time.verbose = env.get("VERBOSE_BLOCKTIME") == Some("true");
        Ok(config)
    }

    /// Catalog from `CATALOG_PATH` (or the built-in one), narrowed to `CHAINS`.
    pub fn load_catalog(&self) -> Result<EndpointCatalog, ConfigError> {
        let catalog = match &self.catalog_path {
            Some(path) => EndpointCatalog::from_json_file(path)?,
            None => EndpointCatalog::builtin(),
        };
        match &self.chains {
            Some(ids) => catalog.select(ids),
            None => Ok(catalog),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvOverrides {
        EnvOverrides::from_vars(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn builtin_catalog_has_unique_ids() {
        let catalog = EndpointCatalog::builtin();
        assert!(EndpointCatalog::new(catalog.endpoints().to_vec()).is_ok());
        assert!(catalog.get(EndpointId(314159)).is_some());
    }

    #[test]
    fn multicall3_address_matches_hex() {
        assert_eq!(
            parse_address("0xcA11bde05977b3631167028862bE2a173976CA11").unwrap(),
            MULTICALL3_ADDRESS
        );
    }

    #[test]
    fn duplicate_ids_rejected() {
        let one = EndpointCatalog::builtin().endpoints()[0].clone();
        let err = EndpointCatalog::new(vec![one.clone(), one]).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateEndpoint(EndpointId(1))));
    }

    #[test]
    fn catalog_from_json_defaults_multicall() {
        let json = r#"[{
            "id": 7,
            "name": "seven",
            "rpcUrl": "http://localhost:8545",
            "maxBlockRange": 1000,
            "maxBatchSize": 50,
            "avgBlocksPerDay": 7200
        }]"#;
        let catalog = EndpointCatalog::from_json(json).unwrap();
        let e = catalog.get(EndpointId(7)).unwrap();
        assert_eq!(e.multicall_address, MULTICALL3_ADDRESS);
        assert!(!e.can_use_websocket);
        assert_eq!(e.ws_url, None);
    }

    #[test]
    fn select_keeps_catalog_order_and_rejects_unknown() {
        let catalog = EndpointCatalog::builtin();
        let picked = catalog.select(&[EndpointId(137), EndpointId(1)]).unwrap();
        assert_eq!(picked.ids(), vec![EndpointId(1), EndpointId(137)]);
        assert!(matches!(
            catalog.select(&[EndpointId(999)]),
            Err(ConfigError::UnknownEndpoint(EndpointId(999)))
        ));
    }

    #[test]
    fn websocket_url_derived_only_when_allowed() {
        let mut e = EndpointCatalog::builtin().endpoints()[0].clone();
        assert_eq!(e.websocket_url("https://node.example"), None);
        e.can_use_websocket = true;
        assert_eq!(
            e.websocket_url("https://node.example/rpc").as_deref(),
            Some("wss://node.example/rpc")
        );
        e.ws_url = Some("ws://explicit:8546".into());
        assert_eq!(
            e.websocket_url("https://node.example").as_deref(),
            Some("ws://explicit:8546")
        );
    }

    #[test]
    fn env_overrides_per_endpoint_keys() {
        let env = env(&[
            ("RPC_AUTH_TOKEN_FOR_7", "secret"),
            ("MULTICALL_RPC_URI_FOR_9", "http://multicall.example"),
            ("RPC_URI_FOR_9", "http://rpc.example"),
            ("RPC_AUTH_TOKEN_FOR_8", ""),
        ]);
        assert!(env.auth_token(EndpointId(7)).is_some());
        assert!(env.auth_token(EndpointId(8)).is_none());
        assert_eq!(env.multicall_url(EndpointId(9)), Some("http://multicall.example"));
        assert_eq!(env.rpc_url(EndpointId(9)), Some("http://rpc.example"));
        assert_eq!(env.rpc_url(EndpointId(7)), None);
    }

    #[test]
    fn env_overrides_debug_hides_values() {
        let env = env(&[("RPC_AUTH_TOKEN_FOR_7", "secret")]);
        assert!(!format!("{env:?}").contains("secret"));
    }

    #[test]
    fn daemon_config_defaults() {
        let c = DaemonConfig::from_env(&EnvOverrides::default()).unwrap();
        assert_eq!(c.port, DEFAULT_PORT);
        assert_eq!(c.bootstrap_timeout, None);
        assert!(!c.block_time.verbose);
        assert_eq!(c.block_time.sync_interval, Duration::from_secs(60));
    }

    #[test]
    fn daemon_config_from_env() {
        let c = DaemonConfig::from_env(&env(&[
            ("PORT", "9090"),
            ("VERBOSE_BLOCKTIME", "true"),
            ("CHAINS", "1, 10"),
            ("BOOTSTRAP_TIMEOUT_SECS", "30"),
        ]))
        .unwrap();
        assert_eq!(c.port, 9090);
        assert!(c.block_time.verbose);
        assert_eq!(c.chains, Some(vec![EndpointId(1), EndpointId(10)]));
        assert_eq!(c.bootstrap_timeout, Some(Duration::from_secs(30)));
        assert_eq!(c.load_catalog().unwrap().len(), 2);
    }

    #[test]
    fn daemon_config_rejects_bad_port() {
        let err = DaemonConfig::from_env(&env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn catalog_file_roundtrip_via_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let json = serde_json::to_string(EndpointCatalog::builtin().endpoints()).unwrap();
        std::fs::write(&path, json).unwrap();
        let c = DaemonConfig {
            catalog_path: Some(path),
            ..DaemonConfig::default()
        };
        assert_eq!(c.load_catalog().unwrap().len(), EndpointCatalog::builtin().len());
    }
}
