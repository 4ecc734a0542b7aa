//! Coordinator-side handling of enter and exit requests.
//!
//! [`RebalanceCoordinator`] is the only owner of the [`MembershipRing`]. It
//! runs inside the control server's single worker, so each request mutates
//! the ring and completes its key exchange before the next one is read.

use crate::config::TransferConfig;
use crate::error::{Error, Result, RingError};
use crate::metrics::RingMetrics;
use crate::network::{Connection, ControlRequest, Instruction, RequestHandler};
use crate::partitioning::{EntryHandle, Merge, MembershipRing, RingSnapshot, Split};
use crate::rebalancing::transfer::{self, ExchangeShape, NodeLink, TransferReport};
use crate::storage::LocalStore;
use crate::types::{KeyRange, NodeId};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Owner of ring membership and the coordinator's local keys.
pub struct RebalanceCoordinator {
    ring: MembershipRing<NodeLink>,
    store: Arc<LocalStore>,
    config: TransferConfig,
    metrics: Arc<RingMetrics>,
    snapshot_tx: watch::Sender<RingSnapshot>,
}

impl RebalanceCoordinator {
    /// Create a coordinator that owns the whole key space.
    ///
    /// Returns the receiving side of the snapshot channel, which is updated
    /// after every handled request.
    pub fn new(
        store: Arc<LocalStore>,
        config: TransferConfig,
        metrics: Arc<RingMetrics>,
    ) -> (Self, watch::Receiver<RingSnapshot>) {
        let ring = MembershipRing::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(ring.snapshot());

        let coordinator = Self {
            ring,
            store,
            config,
            metrics,
            snapshot_tx,
        };
        (coordinator, snapshot_rx)
    }

    /// Current membership.
    pub fn ring(&self) -> &MembershipRing<NodeLink> {
        &self.ring
    }

    /// Handle `enter <id> <port>` arriving on `conn`.
    ///
    /// On success `conn` becomes the new member's persistent link.
    pub async fn enter(&mut self, id: u32, port: u16, mut conn: Connection) {
        let address = SocketAddr::new(conn.peer_addr().ip(), port);

        let split = match self.ring.insert_split(id, Some(address)) {
            Ok(split) => split,
            Err(e) => {
                self.reject(&mut conn, "enter", e).await;
                return;
            }
        };

        if let Some(entry) = self.ring.entry_mut(split.joined) {
            entry.conn = Some(NodeLink::new(conn));
        }

        let shape = ExchangeShape::for_join(self.ring.is_coordinator(split.owner));
        let result = self.exchange_for_join(shape, &split).await;
        self.record_exchange(shape, split.moved, &result);
        if shape == ExchangeShape::Relay {
            self.announce_range(split.owner).await;
        }

        self.metrics.joins.inc();
        info!(
            node_id = id,
            %address,
            range = %split.moved,
            %shape,
            "Node joined"
        );

        let joined = self
            .ring
            .entry_mut(split.joined)
            .and_then(|entry| entry.conn.as_mut());
        if let Some(conn) = joined {
            if let Err(e) = conn.send(Instruction::Joined { range: split.moved }).await {
                warn!(node_id = id, error = %e, "Failed to acknowledge join");
            }
        }
    }

    /// Handle `exit <id>` arriving on `request`.
    ///
    /// The leaving member is told `FINISHED` on its persistent link, which is
    /// then dropped. `request` is only answered when the exit is refused.
    pub async fn exit(&mut self, id: NodeId, mut request: Connection) {
        let merge = match self.ring.remove_merge(id) {
            Ok(merge) => merge,
            Err(e) => {
                self.reject(&mut request, "exit", e).await;
                return;
            }
        };
        let Merge {
            mut departed,
            successor,
            moved,
        } = merge;

        let shape = ExchangeShape::for_leave(self.ring.is_coordinator(successor));
        let mut link = departed.conn.take();

        let result = match link.as_mut() {
            Some(sender) => self.exchange_for_leave(shape, successor, moved, sender).await,
            None => Err(Error::transfer(format!("node {} has no open link", id))),
        };
        self.record_exchange(shape, moved, &result);
        if shape == ExchangeShape::Relay {
            self.announce_range(successor).await;
        }

        self.metrics.leaves.inc();
        info!(node_id = id, range = %moved, %shape, "Node left");

        if let Some(mut link) = link {
            if let Err(e) = link.send(Instruction::Finished).await {
                warn!(node_id = id, error = %e, "Failed to send FINISHED");
            }
            if let Err(e) = link.close().await {
                debug!(node_id = id, error = %e, "Failed to close departed link");
            }
        }
    }

    async fn exchange_for_join(
        &mut self,
        shape: ExchangeShape,
        split: &Split,
    ) -> Result<TransferReport> {
        let keys_moved = match shape {
            ExchangeShape::Push => {
                let receiver = self
                    .ring
                    .entry_mut(split.joined)
                    .and_then(|entry| entry.conn.as_mut())
                    .map(NodeLink::conn)
                    .ok_or_else(|| Error::transfer("joining node has no open link"))?;
                transfer::push(&self.store, split.moved, receiver).await?
            }
            _ => {
                let (receiver, sender) = self
                    .ring
                    .pair_mut(split.joined, split.owner)
                    .ok_or_else(|| Error::transfer("relay ends are not distinct members"))?;
                let receiver_addr = receiver
                    .address()
                    .ok_or_else(|| Error::transfer("joining node has no address"))?;
                let (Some(receiver), Some(sender)) = (receiver.conn.as_mut(), sender.conn.as_mut())
                else {
                    return Err(Error::transfer("relay end has no open link"));
                };
                transfer::relay(split.moved, receiver, receiver_addr, sender.conn(), &self.config)
                    .await?
            }
        };

        Ok(TransferReport {
            shape,
            range: split.moved,
            keys_moved,
        })
    }

    async fn exchange_for_leave(
        &mut self,
        shape: ExchangeShape,
        successor: EntryHandle,
        moved: KeyRange,
        sender: &mut NodeLink,
    ) -> Result<TransferReport> {
        let keys_moved = match shape {
            ExchangeShape::Pull => transfer::pull(&self.store, moved, sender, &self.config).await?,
            _ => {
                let entry = self
                    .ring
                    .entry_mut(successor)
                    .ok_or_else(|| Error::transfer("successor is not a live member"))?;
                let receiver_addr = entry
                    .address()
                    .ok_or_else(|| Error::transfer("successor has no address"))?;
                let receiver = entry
                    .conn
                    .as_mut()
                    .ok_or_else(|| Error::transfer("successor has no open link"))?;
                transfer::relay(moved, receiver, receiver_addr, sender.conn(), &self.config).await?
            }
        };

        Ok(TransferReport {
            shape,
            range: moved,
            keys_moved,
        })
    }

    fn record_exchange(
        &self,
        shape: ExchangeShape,
        range: KeyRange,
        result: &Result<TransferReport>,
    ) {
        self.metrics.exchanges.inc([shape.as_str()]);
        match result {
            Ok(report) => {
                self.metrics.keys_transferred.inc_by(report.keys_moved as u64);
                debug!(%shape, %range, keys = report.keys_moved, "Exchange complete");
            }
            Err(e) => {
                self.metrics.transfer_failures.inc();
                error!(%shape, %range, error = %e, "Exchange failed, ring change kept");
            }
        }
    }

    /// Tell a remote member its range after a neighbour's join or leave.
    async fn announce_range(&mut self, handle: EntryHandle) {
        let Some(entry) = self.ring.entry_mut(handle) else {
            return;
        };
        let (Some(id), Some(range)) = (entry.node_id(), entry.range()) else {
            return;
        };
        if let Some(link) = entry.conn.as_mut() {
            if let Err(e) = link.send(Instruction::Range { range }).await {
                warn!(node_id = id, %range, error = %e, "Failed to announce range");
            }
        }
    }

    async fn reject(&self, conn: &mut Connection, request: &'static str, e: RingError) {
        self.metrics.rejected.inc([rejection_kind(&e)]);
        if matches!(e, RingError::ConsistencyViolation(_)) {
            error!(request, error = %e, "Ring consistency violated");
        } else {
            warn!(request, peer = %conn.peer_addr(), error = %e, "Request rejected");
        }

        let reply = Instruction::Rejected {
            reason: e.to_string(),
        };
        if let Err(e) = conn.send(reply).await {
            debug!(error = %e, "Failed to send rejection");
        }
    }

    fn publish(&self) {
        let snapshot = self.ring.snapshot();
        debug!(version = snapshot.version, members = snapshot.members.len(), "Publishing ring");
        self.snapshot_tx.send_replace(snapshot);
    }
}

fn rejection_kind(e: &RingError) -> &'static str {
    match e {
        RingError::InvalidId { .. } => "invalid_id",
        RingError::NotFound(_) => "not_found",
        RingError::LastNodeExit(_) => "last_node_exit",
        RingError::ConsistencyViolation(_) => "consistency_violation",
    }
}

#[async_trait]
impl RequestHandler for RebalanceCoordinator {
    async fn handle(&mut self, mut conn: Connection) {
        match conn.recv_parsed::<ControlRequest>(self.config.read_timeout).await {
            Ok(ControlRequest::Enter { id, port }) => self.enter(id, port, conn).await,
            Ok(ControlRequest::Exit { id }) => self.exit(id, conn).await,
            Err(e) => {
                self.metrics.rejected.inc(["malformed"]);
                warn!(peer = %conn.peer_addr(), error = %e, "Discarding control request");
                let reply = Instruction::Rejected {
                    reason: e.to_string(),
                };
                if let Err(e) = conn.send(reply).await {
                    debug!(error = %e, "Failed to send rejection");
                }
                return;
            }
        }
        self.publish();
    }
}
