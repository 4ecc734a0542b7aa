//! The coordinator process: control server, ring owner and its local keys.

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::metrics::RingMetrics;
use crate::network::ControlServer;
use crate::partitioning::RingSnapshot;
use crate::rebalancing::RebalanceCoordinator;
use crate::storage::LocalStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A running coordinator.
///
/// The ring itself lives in the server's worker task. This handle only sees
/// the published snapshots, the local store and the counters.
pub struct CoordinatorService {
    local_addr: SocketAddr,
    store: Arc<LocalStore>,
    metrics: Arc<RingMetrics>,
    snapshot_rx: watch::Receiver<RingSnapshot>,
    shutdown_tx: mpsc::Sender<()>,
    server: JoinHandle<()>,
}

impl CoordinatorService {
    /// Start a coordinator.
    ///
    /// This will:
    /// 1. Preload the local store from the configured entries
    /// 2. Create the ring with the coordinator owning every key
    /// 3. Bind the control server and start serving requests
    pub async fn start(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(LocalStore::with_entries(config.initial_data.clone()));
        let metrics = Arc::new(RingMetrics::new());
        let (coordinator, snapshot_rx) =
            RebalanceCoordinator::new(store.clone(), config.transfer, metrics.clone());

        let (server, shutdown_tx) =
            ControlServer::bind(config.listen_addr, config.queue_capacity).await?;
        let local_addr = server.local_addr()?;

        info!(
            addr = %local_addr,
            keys = store.len(),
            "Starting coordinator"
        );

        let server = tokio::spawn(async move {
            if let Err(e) = server.run(coordinator).await {
                error!(error = %e, "Control server error");
            }
        });

        Ok(Self {
            local_addr,
            store,
            metrics,
            snapshot_rx,
            shutdown_tx,
            server,
        })
    }

    /// Address the control server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The coordinator's own keys.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<RingMetrics> {
        &self.metrics
    }

    /// Latest published ring.
    pub fn snapshot(&self) -> RingSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that changes after every handled request.
    pub fn subscribe(&self) -> watch::Receiver<RingSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Stop accepting, finish queued requests, and wait for the worker.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down coordinator");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.server.await {
            error!(error = %e, "Control server task panicked");
            return Err(Error::Shutdown);
        }
        Ok(())
    }
}
