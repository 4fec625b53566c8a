//! Configuration for ipamkv
//!
//! Centralized configuration with sensible defaults.
//!
//! - [`Config`]: IPAM side (allocation policy parameters, node identity, store address)
//! - [`ServerConfig`]: the store server (data directory, WAL, listener)

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use ipnet::Ipv4Net;

use crate::error::{IpamError, Result};

/// Environment variable names read by [`Config::from_env`]
pub mod env {
    pub const SUPERNET: &str = "IPAM_SUPERNET";
    pub const SUBNET_LENGTH: &str = "IPAM_SUBNET_LENGTH";
    pub const NODE: &str = "IPAM_NODE";
    pub const HOSTNAME: &str = "HOSTNAME";
    pub const NAMESPACE: &str = "IPAM_NAMESPACE";
    pub const STORE: &str = "IPAM_STORE";
}

/// Longest subnet prefix the allocator hands out (a /30 still has two hosts)
pub const MAX_SUBNET_PREFIX: u8 = 30;

/// IPAM configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Allocation Policy
    // -------------------------------------------------------------------------
    /// Outer range dynamic subnets are carved from
    pub supernet: Ipv4Net,

    /// Prefix length of dynamically allocated subnets
    pub subnet_prefix_len: u8,

    // -------------------------------------------------------------------------
    // Identity / Layout
    // -------------------------------------------------------------------------
    /// Identity of this host, used for pool node-usage markers
    pub node_id: String,

    /// Key prefix all records live under
    pub namespace: String,

    /// Conflict retries before a dynamic allocation gives up
    pub max_attempts: usize,

    // -------------------------------------------------------------------------
    // Store Connection
    // -------------------------------------------------------------------------
    /// Store server address (host:port)
    pub store_addr: String,

    /// Store read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Store write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supernet: Ipv4Net::new_assert(Ipv4Addr::new(10, 80, 0, 0), 12),
            subnet_prefix_len: 24,
            node_id: "localhost".to_string(),
            namespace: "/ipam".to_string(),
            max_attempts: 64,
            store_addr: "127.0.0.1:2379".to_string(),
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the process environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of variables
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();

        let mut config = Config::default();

        if let Some(value) = vars.get(env::SUPERNET) {
            config.supernet = value.parse().map_err(|_| {
                IpamError::Config(format!("{}: invalid CIDR {:?}", env::SUPERNET, value))
            })?;
        }
        if let Some(value) = vars.get(env::SUBNET_LENGTH) {
            config.subnet_prefix_len = value.parse().map_err(|_| {
                IpamError::Config(format!("{}: invalid prefix length {:?}", env::SUBNET_LENGTH, value))
            })?;
        }
        if let Some(node) = vars.get(env::NODE).or_else(|| vars.get(env::HOSTNAME)) {
            config.node_id = node.clone();
        }
        if let Some(namespace) = vars.get(env::NAMESPACE) {
            config.namespace = namespace.clone();
        }
        if let Some(addr) = vars.get(env::STORE) {
            config.store_addr = addr.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<()> {
        if self.subnet_prefix_len < self.supernet.prefix_len() {
            return Err(IpamError::Config(format!(
                "subnet prefix length /{} is shorter than supernet {}",
                self.subnet_prefix_len, self.supernet
            )));
        }
        if self.subnet_prefix_len > MAX_SUBNET_PREFIX {
            return Err(IpamError::Config(format!(
                "subnet prefix length /{} leaves no usable hosts (max /{})",
                self.subnet_prefix_len, MAX_SUBNET_PREFIX
            )));
        }
        if self.node_id.is_empty() || self.node_id.contains('/') || self.node_id.contains(char::is_whitespace) {
            return Err(IpamError::Config(format!("invalid node id {:?}", self.node_id)));
        }
        if !self.namespace.starts_with('/') || self.namespace.ends_with('/') {
            return Err(IpamError::Config(format!(
                "namespace must be an absolute path without trailing slash: {:?}",
                self.namespace
            )));
        }
        if self.max_attempts == 0 {
            return Err(IpamError::Config("max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the supernet dynamic subnets are allocated from
    pub fn supernet(mut self, supernet: Ipv4Net) -> Self {
        self.config.supernet = supernet;
        self
    }

    /// Set the prefix length of dynamic subnets
    pub fn subnet_prefix_len(mut self, len: u8) -> Self {
        self.config.subnet_prefix_len = len;
        self
    }

    /// Set this host's identity
    pub fn node_id(mut self, node: impl Into<String>) -> Self {
        self.config.node_id = node.into();
        self
    }

    /// Set the key namespace root
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the conflict retry ceiling
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the store server address
    pub fn store_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.store_addr = addr.into();
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Store server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     └── wal.log          (write-ahead log)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Rewrite the WAL from live state after this many appended entries
    pub compaction_threshold: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Worker threads, each serving one connection at a time
    pub workers: usize,

    /// Max accepted connections waiting for a worker
    pub max_connections: usize,

    /// Idle timeout: a connection sending nothing for this long is closed,
    /// freeing its worker (milliseconds, 0 = never)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./ipamkv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            compaction_threshold: 10_000,
            listen_addr: "127.0.0.1:2379".to_string(),
            workers: 16,
            max_connections: 1024,
            read_timeout_ms: 2000,
            write_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Create a new server config builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for ServerConfig
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the number of WAL entries that triggers compaction
    pub fn compaction_threshold(mut self, entries: u64) -> Self {
        self.config.compaction_threshold = entries;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the number of worker threads
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count;
        self
    }

    /// Set the maximum number of queued connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds, 0 = none)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds, 0 = none)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}
