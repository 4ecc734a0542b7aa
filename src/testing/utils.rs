use crate::cluster::{CoordinatorService, NodeService};
use crate::config::{CoordinatorConfig, NodeConfig, TransferConfig};
use crate::partitioning::RingSnapshot;
use crate::types::{Key, NodeId, KEY_MAX, KEY_MIN};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

/// Allocate OS-assigned ports by briefly binding to port 0.
/// Returns a vector of (NodeId, port) pairs.
pub(crate) async fn allocate_os_ports(node_ids: &[NodeId]) -> Vec<(NodeId, u16)> {
    let mut results = Vec::with_capacity(node_ids.len());
    for &node_id in node_ids {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener); // Release the port immediately
        results.push((node_id, port));
    }
    results
}

pub(crate) async fn wait_for_result<F, Fut, T, P>(
    mut action: F,
    predicate: P,
    timeout: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = T>,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let interval = Duration::from_millis(20);

    while start.elapsed() < timeout {
        let result = action().await;
        if predicate(&result) {
            return Some(result);
        }
        tokio::time::sleep(interval).await;
    }
    None
}

/// Short deadlines so failure tests finish quickly.
pub(crate) fn fast_transfer_config() -> TransferConfig {
    TransferConfig::default()
        .with_connect_timeout(Duration::from_secs(1))
        .with_read_timeout(Duration::from_secs(2))
        .with_transfer_timeout(Duration::from_secs(5))
}

/// A coordinator plus any number of nodes on loopback.
pub(crate) struct TestRing {
    pub coordinator: CoordinatorService,
    pub nodes: BTreeMap<NodeId, NodeService>,
}

impl TestRing {
    /// Start a coordinator holding `entries`.
    pub async fn start(entries: &[(Key, &str)]) -> Self {
        Self::start_with(entries, fast_transfer_config()).await
    }

    /// Start a coordinator holding `entries` with its own exchange deadlines.
    /// Nodes keep `fast_transfer_config`.
    pub async fn start_with(entries: &[(Key, &str)], transfer: TransferConfig) -> Self {
        let mut config = CoordinatorConfig::new("127.0.0.1:0".parse().unwrap())
            .with_transfer_config(transfer);
        for (key, value) in entries {
            config = config.with_entry(*key, *value);
        }

        Self {
            coordinator: CoordinatorService::start(config).await.unwrap(),
            nodes: BTreeMap::new(),
        }
    }

    /// Create (but do not enter) a node listening on a fresh port.
    pub async fn add_node(&mut self, id: NodeId) -> &NodeService {
        let port = allocate_os_ports(&[id]).await[0].1;
        let listen_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        self.add_node_at(id, listen_addr)
    }

    /// Create (but do not enter) a node listening on `listen_addr`.
    pub fn add_node_at(&mut self, id: NodeId, listen_addr: SocketAddr) -> &NodeService {
        let config = NodeConfig::new(id, listen_addr, self.coordinator.local_addr())
            .with_transfer_config(fast_transfer_config());
        self.nodes.insert(id, NodeService::new(config));
        self.node(id)
    }

    pub fn node(&self, id: NodeId) -> &NodeService {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("node {} was never added", id))
    }

    /// Create a node and enter it into the ring.
    pub async fn join(&mut self, id: NodeId) {
        self.add_node(id).await;
        self.node(id)
            .enter()
            .await
            .unwrap_or_else(|e| panic!("node {} failed to enter: {}", id, e));
    }

    /// Wait until the coordinator has published `version`.
    pub async fn snapshot_at(&self, version: u64) -> RingSnapshot {
        wait_for_result(
            || async { self.coordinator.snapshot() },
            |s| s.version >= version,
            Duration::from_secs(5),
        )
        .await
        .unwrap_or_else(|| panic!("ring never reached version {}", version))
    }

    /// Keys held by the member with `id`, coordinator included.
    pub fn keys_of(&self, id: NodeId) -> Vec<Key> {
        let store = if id == crate::types::COORDINATOR_ID {
            self.coordinator.store()
        } else {
            self.node(id).store()
        };
        store.snapshot().into_iter().map(|(k, _)| k).collect()
    }

    /// Every key in the space is owned by exactly one member, and every
    /// stored key lives only in its owner's store.
    pub fn assert_partitioned(&self, snapshot: &RingSnapshot) {
        let mut next = KEY_MIN as u32;
        for member in &snapshot.members {
            assert_eq!(member.range.start as u32, next, "gap or overlap at {}", next);
            next = member.range.end as u32 + 1;
        }
        assert_eq!(next, KEY_MAX as u32 + 1, "ring does not reach the top key");

        let mut holders: BTreeMap<Key, Vec<NodeId>> = BTreeMap::new();
        for member in &snapshot.members {
            for key in self.keys_of(member.id) {
                holders.entry(key).or_default().push(member.id);
            }
        }
        for (key, ids) in holders {
            let owner = snapshot.owner_of(key).map(|m| m.id);
            assert_eq!(ids.len(), 1, "key {} held by {:?}", key, ids);
            assert_eq!(Some(ids[0]), owner, "key {} held by non-owner", key);
        }
    }

    pub async fn shutdown(self) {
        self.coordinator.shutdown().await.unwrap();
    }
}
