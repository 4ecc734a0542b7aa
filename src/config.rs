//! Configuration types for the coordinator and nodes.

use crate::error::{Error, Result};
use crate::types::{in_key_space, Key, NodeId, COORDINATOR_ID};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Deadlines applied to peer I/O during joins, leaves and exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Deadline for opening a TCP connection to a peer.
    pub connect_timeout: Duration,

    /// Deadline for a single control reply (`READY`, `JOINED`, ...).
    pub read_timeout: Duration,

    /// Deadline for a whole key stream to complete.
    pub transfer_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(120),
        }
    }
}

impl TransferConfig {
    /// Set the connect deadline.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-reply deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the whole-stream deadline.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Longest a relay receiver may take to report: accept the sender, then
    /// read its whole stream.
    pub fn relay_timeout(&self) -> Duration {
        self.read_timeout + self.transfer_timeout
    }

    /// Longest a node waits for the coordinator to answer an enter or exit.
    ///
    /// Covers discarding a late reply from an earlier relay, one `READY` and
    /// one full relay.
    pub fn exchange_timeout(&self) -> Duration {
        self.read_timeout + self.relay_timeout() * 2
    }

    fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero()
            || self.read_timeout.is_zero()
            || self.transfer_timeout.is_zero()
        {
            return Err(Error::Config("transfer timeouts must be non-zero".into()));
        }
        Ok(())
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Address the control server listens on.
    pub listen_addr: SocketAddr,

    /// Entries the coordinator holds before any node joins.
    pub initial_data: BTreeMap<Key, String>,

    /// Exchange deadlines.
    pub transfer: TransferConfig,

    /// Accepted connections allowed to wait for the worker.
    pub queue_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            initial_data: BTreeMap::new(),
            transfer: TransferConfig::default(),
            queue_capacity: 64,
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration listening on `listen_addr`.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    /// Add one initial entry.
    pub fn with_entry(mut self, key: Key, value: impl Into<String>) -> Self {
        self.initial_data.insert(key, value.into());
        self
    }

    /// Replace the initial entries.
    pub fn with_initial_data(mut self, data: BTreeMap<Key, String>) -> Self {
        self.initial_data = data;
        self
    }

    /// Set exchange deadlines.
    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Set the request queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Parse a TOML document.
    ///
    /// ```toml
    /// listen_addr = "127.0.0.1:7000"
    ///
    /// [data]
    /// 5 = "a"
    /// 900 = "b"
    ///
    /// [transfer]
    /// read_timeout_ms = 10000
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: CoordinatorFile =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;

        let mut initial_data = BTreeMap::new();
        for (key, value) in file.data {
            initial_data.insert(parse_key(&key)?, value);
        }

        let config = Self {
            listen_addr: file.listen_addr,
            initial_data,
            transfer: file.transfer.into_config(),
            queue_capacity: file.queue_capacity.unwrap_or(64),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }
        if let Some((key, _)) = self.initial_data.iter().find(|(k, _)| !in_key_space(**k as u32)) {
            return Err(Error::Config(format!("key {} outside key space", key)));
        }
        if let Some((key, _)) = self.initial_data.iter().find(|(_, v)| v.is_empty()) {
            return Err(Error::Config(format!("empty value for key {}", key)));
        }
        self.transfer.validate()
    }
}

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identifier, and the upper bound of the range the node will own.
    pub node_id: NodeId,

    /// Address relay receivers listen on. Its port is advertised on enter.
    pub listen_addr: SocketAddr,

    /// Coordinator control address.
    pub coordinator_addr: SocketAddr,

    /// Exchange deadlines.
    pub transfer: TransferConfig,
}

impl NodeConfig {
    /// Create a configuration for node `node_id`.
    pub fn new(node_id: NodeId, listen_addr: SocketAddr, coordinator_addr: SocketAddr) -> Self {
        Self {
            node_id,
            listen_addr,
            coordinator_addr,
            transfer: TransferConfig::default(),
        }
    }

    /// Set exchange deadlines.
    pub fn with_transfer_config(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Parse a TOML document.
    ///
    /// ```toml
    /// node_id = 500
    /// listen_addr = "127.0.0.1:7500"
    /// coordinator_addr = "127.0.0.1:7000"
    /// ```
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: NodeFile = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        if !in_key_space(file.node_id) {
            return Err(Error::Config(format!(
                "node_id {} outside key space",
                file.node_id
            )));
        }

        let config = Self {
            node_id: file.node_id as NodeId,
            listen_addr: file.listen_addr,
            coordinator_addr: file.coordinator_addr,
            transfer: file.transfer.into_config(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read_file(path.as_ref())?)
    }

    /// Check every value is usable.
    pub fn validate(&self) -> Result<()> {
        if !in_key_space(self.node_id as u32) {
            return Err(Error::Config(format!(
                "node_id {} outside key space",
                self.node_id
            )));
        }
        if self.node_id == COORDINATOR_ID {
            return Err(Error::Config(format!(
                "node_id {} is reserved for the coordinator",
                COORDINATOR_ID
            )));
        }
        if self.listen_addr.port() == 0 {
            return Err(Error::Config("listen_addr needs a fixed port".into()));
        }
        self.transfer.validate()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CoordinatorFile {
    listen_addr: SocketAddr,
    #[serde(default)]
    data: BTreeMap<String, String>,
    #[serde(default)]
    transfer: TransferFile,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeFile {
    node_id: u32,
    listen_addr: SocketAddr,
    coordinator_addr: SocketAddr,
    #[serde(default)]
    transfer: TransferFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransferFile {
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    transfer_timeout_ms: Option<u64>,
}

impl TransferFile {
    fn into_config(self) -> TransferConfig {
        let defaults = TransferConfig::default();
        TransferConfig {
            connect_timeout: self
                .connect_timeout_ms
                .map_or(defaults.connect_timeout, Duration::from_millis),
            read_timeout: self
                .read_timeout_ms
                .map_or(defaults.read_timeout, Duration::from_millis),
            transfer_timeout: self
                .transfer_timeout_ms
                .map_or(defaults.transfer_timeout, Duration::from_millis),
        }
    }
}

fn parse_key(text: &str) -> Result<Key> {
    text.parse::<u32>()
        .ok()
        .filter(|k| in_key_space(*k))
        .map(|k| k as Key)
        .ok_or_else(|| Error::Config(format!("invalid key {:?}", text)))
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert!(config.initial_data.is_empty());
        assert_eq!(config.transfer.read_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_deadlines() {
        let transfer = TransferConfig::default()
            .with_read_timeout(Duration::from_millis(200))
            .with_transfer_timeout(Duration::from_millis(300));

        assert_eq!(transfer.relay_timeout(), Duration::from_millis(500));
        assert_eq!(transfer.exchange_timeout(), Duration::from_millis(1200));
    }

    #[test]
    fn test_config_builder() {
        let config = CoordinatorConfig::new("127.0.0.1:9000".parse().unwrap())
            .with_entry(5, "a")
            .with_entry(900, "b")
            .with_transfer_config(
                TransferConfig::default().with_read_timeout(Duration::from_millis(250)),
            );

        assert_eq!(config.initial_data.len(), 2);
        assert_eq!(config.initial_data.get(&900).map(String::as_str), Some("b"));
        assert_eq!(config.transfer.read_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_coordinator_from_toml() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            listen_addr = "127.0.0.1:7000"

            [data]
            5 = "a"
            900 = "hello world"

            [transfer]
            read_timeout_ms = 1500
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.initial_data.get(&5).map(String::as_str), Some("a"));
        assert_eq!(
            config.initial_data.get(&900).map(String::as_str),
            Some("hello world")
        );
        assert_eq!(config.transfer.read_timeout, Duration::from_millis(1500));
        assert_eq!(config.transfer.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_coordinator_rejects_bad_keys() {
        let out_of_space = CoordinatorConfig::from_toml_str(
            "listen_addr = \"127.0.0.1:7000\"\n[data]\n1024 = \"x\"\n",
        );
        assert!(matches!(out_of_space, Err(Error::Config(_))));

        let not_a_number = CoordinatorConfig::from_toml_str(
            "listen_addr = \"127.0.0.1:7000\"\n[data]\nabc = \"x\"\n",
        );
        assert!(matches!(not_a_number, Err(Error::Config(_))));

        let empty = CoordinatorConfig::from_toml_str(
            "listen_addr = \"127.0.0.1:7000\"\n[data]\n5 = \"\"\n",
        );
        assert!(matches!(empty, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_empty_value() {
        let config = CoordinatorConfig::new("127.0.0.1:7000".parse().unwrap())
            .with_entry(5, "a")
            .with_entry(6, "");
        match config.validate() {
            Err(Error::Config(reason)) => assert!(reason.contains("key 6")),
            other => panic!("unexpected result {:?}", other),
        }

        let data = BTreeMap::from([(9, String::new())]);
        let config = CoordinatorConfig::default().with_initial_data(data);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_from_toml() {
        let config = NodeConfig::from_toml_str(
            r#"
            node_id = 500
            listen_addr = "127.0.0.1:7500"
            coordinator_addr = "127.0.0.1:7000"
            "#,
        )
        .unwrap();

        assert_eq!(config.node_id, 500);
        assert_eq!(config.listen_addr.port(), 7500);
        assert_eq!(config.transfer, TransferConfig::default());
    }

    #[test]
    fn test_node_validation() {
        let coordinator: SocketAddr = "127.0.0.1:7000".parse().unwrap();

        let reserved = NodeConfig::new(0, "127.0.0.1:7500".parse().unwrap(), coordinator);
        assert!(matches!(reserved.validate(), Err(Error::Config(_))));

        let too_large = NodeConfig::new(1024, "127.0.0.1:7500".parse().unwrap(), coordinator);
        assert!(matches!(too_large.validate(), Err(Error::Config(_))));

        let no_port = NodeConfig::new(12, "127.0.0.1:0".parse().unwrap(), coordinator);
        assert!(matches!(no_port.validate(), Err(Error::Config(_))));

        let zero_timeout = NodeConfig::new(12, "127.0.0.1:7500".parse().unwrap(), coordinator)
            .with_transfer_config(TransferConfig::default().with_read_timeout(Duration::ZERO));
        assert!(matches!(zero_timeout.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "node_id = 200\nlisten_addr = \"127.0.0.1:7200\"\ncoordinator_addr = \"127.0.0.1:7000\""
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.node_id, 200);

        let missing = NodeConfig::load(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
