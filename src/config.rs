//! Configuration of the regtest network.
//!
//! A TOML file describes the bitcoind endpoint, the polling/confirmation knobs and every LND
//! node taking part in the scenario. Missing fields fall back to the ports and credentials of the
//! usual Docker setup (hub on 10009, Alice on 10010, Bob on 10011, bitcoind on 18443).

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable pointing to the configuration file.
pub const CONFIG_ENV: &str = "LND_REGTEST_CONFIG";

#[derive(Debug)]
pub enum ConfigError {
    Read { file: PathBuf, error: std::io::Error, },
    Parse { file: PathBuf, error: toml::de::Error, },
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Read { file, .. } => write!(f, "failed to read config file {}", file.display()),
            ConfigError::Parse { file, .. } => write!(f, "failed to parse config file {}", file.display()),
            ConfigError::Invalid(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { error, .. } => Some(error),
            ConfigError::Parse { error, .. } => Some(error),
            ConfigError::Invalid(_) => None,
        }
    }
}

/// Part a node plays in the scenario
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// The node both leaves connect and open channels to.
    Hub,
    Alice,
    Bob,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NodeRole::Hub => f.write_str("hub"),
            NodeRole::Alice => f.write_str("alice"),
            NodeRole::Bob => f.write_str("bob"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bitcoind: BitcoindConfig,

    #[serde(default)]
    pub regtest: RegtestConfig,

    #[serde(default = "default_nodes")]
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoindConfig {
    /// JSON-RPC endpoint
    #[serde(default = "default_bitcoind_url")]
    pub url: String,

    /// `rpcuser` from bitcoin.conf
    #[serde(default = "default_bitcoind_credential")]
    pub user: String,

    /// `rpcpassword` from bitcoin.conf
    #[serde(default = "default_bitcoind_credential")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegtestConfig {
    /// Delay between two rounds of sync polling (seconds)
    #[serde(default = "default_sync_poll_secs")]
    pub sync_poll_secs: u64,

    /// Rounds of sync polling before giving up
    #[serde(default = "default_sync_attempts")]
    pub sync_attempts: u32,

    /// Mine a block on each unsynced polling round
    #[serde(default)]
    pub mine_while_syncing: bool,

    /// Blocks mined to confirm funding and closing transactions
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,

    /// Rounds of funding before giving up
    #[serde(default = "default_funding_attempts")]
    pub funding_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Display name used in logs
    pub name: String,

    pub role: NodeRole,

    /// Host the GRPC interface is reachable on
    #[serde(default = "default_host")]
    pub host: String,

    pub rpc_port: u16,

    /// Lightning p2p port
    pub node_port: u16,

    /// Address other nodes use to reach this one; looked up through `container` if unset.
    #[serde(default)]
    pub p2p_host: Option<String>,

    /// Docker container running the node
    #[serde(default)]
    pub container: Option<String>,

    pub tls_cert: PathBuf,

    pub macaroon: PathBuf,
}

impl NodeConfig {
    /// GRPC endpoint in the form accepted by [`connect`](crate::connect).
    pub fn rpc_address(&self) -> String {
        format!("https://{}:{}", self.host, self.rpc_port)
    }

    fn docker(name: &str, role: NodeRole, container: &str, rpc_port: u16, node_port: u16) -> Self {
        let data_dir = PathBuf::from("volumes").join(container);
        NodeConfig {
            name: name.to_owned(),
            role,
            host: default_host(),
            rpc_port,
            node_port,
            p2p_host: None,
            container: Some(container.to_owned()),
            tls_cert: data_dir.join("tls.cert"),
            macaroon: data_dir.join("data/chain/bitcoin/regtest/admin.macaroon"),
        }
    }
}

fn default_bitcoind_url() -> String {
    "http://127.0.0.1:18443".to_string()
}

fn default_bitcoind_credential() -> String {
    "test".to_string()
}

fn default_sync_poll_secs() -> u64 {
    5
}

fn default_sync_attempts() -> u32 {
    60
}

fn default_confirmation_blocks() -> u64 {
    10
}

fn default_funding_attempts() -> u32 {
    3
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_nodes() -> Vec<NodeConfig> {
    vec![
        NodeConfig::docker("LND", NodeRole::Hub, "lnd", 10009, 9009),
        NodeConfig::docker("Alice", NodeRole::Alice, "alice", 10010, 9010),
        NodeConfig::docker("Bob", NodeRole::Bob, "bob", 10011, 9011),
    ]
}

impl Default for BitcoindConfig {
    fn default() -> Self {
        BitcoindConfig {
            url: default_bitcoind_url(),
            user: default_bitcoind_credential(),
            password: default_bitcoind_credential(),
        }
    }
}

impl Default for RegtestConfig {
    fn default() -> Self {
        RegtestConfig {
            sync_poll_secs: default_sync_poll_secs(),
            sync_attempts: default_sync_attempts(),
            mine_while_syncing: false,
            confirmation_blocks: default_confirmation_blocks(),
            funding_attempts: default_funding_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bitcoind: BitcoindConfig::default(),
            regtest: RegtestConfig::default(),
            nodes: default_nodes(),
        }
    }
}

impl RegtestConfig {
    pub fn sync_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync_poll_secs)
    }
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|error| ConfigError::Read { file: path.to_owned(), error, })?;
        let config: Config = toml::from_str(&contents)
            .map_err(|error| ConfigError::Parse { file: path.to_owned(), error, })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `LND_REGTEST_CONFIG`, or the defaults if it's unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Config::from_file(path),
            None => {
                tracing::info!("{} not set, using default configuration", CONFIG_ENV);
                Ok(Config::default())
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(ConfigError::Invalid("node name cannot be empty".to_string()));
            }
            if !names.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate node name {}", node.name)));
            }
            if node.rpc_port == 0 || node.node_port == 0 {
                return Err(ConfigError::Invalid(format!("{} ports must be > 0", node.name)));
            }
        }

        for role in [NodeRole::Hub, NodeRole::Alice, NodeRole::Bob].iter() {
            match self.nodes.iter().filter(|node| node.role == *role).count() {
                1 => (),
                0 => return Err(ConfigError::Invalid(format!("no node has the {} role", role))),
                _ => return Err(ConfigError::Invalid(format!("more than one node has the {} role", role))),
            }
        }

        if self.regtest.sync_attempts == 0 {
            return Err(ConfigError::Invalid("sync_attempts must be > 0".to_string()));
        }

        Ok(())
    }

    /// Returns the node playing `role`.
    ///
    /// Always present in a validated configuration.
    pub fn node(&self, role: NodeRole) -> Option<&NodeConfig> {
        self.nodes.iter().find(|node| node.role == role)
    }
}
