//! A storage node: joins the ring, follows coordinator instructions, leaves.
//!
//! ```text
//!   operator ──enter/exit──▶ NodeService ──control request──▶ coordinator
//!                                 │
//!                                 ▼
//!                         instruction loop ◀──persistent link── coordinator
//!                           put / sendDataToServer / connectToServerAndPut /
//!                           sendToBootstrap / JOINED / RANGE / REJECTED /
//!                           FINISHED
//! ```
//!
//! The instruction loop owns the persistent link and handles one instruction
//! at a time in arrival order.

use crate::config::NodeConfig;
use crate::error::{Error, NetworkError, NodeError, ProtocolError, Result};
use crate::network::{Connection, ControlRequest, Instruction};
use crate::rebalancing::transfer;
use crate::storage::LocalStore;
use crate::types::{KeyRange, NodeId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State of the node's persistent link to the coordinator.
enum Link {
    Disconnected,
    Connected(Session),
}

struct Session {
    task: JoinHandle<()>,
    finished_rx: oneshot::Receiver<()>,
}

/// A ring member running outside the coordinator.
pub struct NodeService {
    config: NodeConfig,
    store: Arc<LocalStore>,
    range: Arc<Mutex<Option<KeyRange>>>,
    link: AsyncMutex<Link>,
}

impl NodeService {
    /// Create a node that is not yet part of the ring.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            store: Arc::new(LocalStore::new()),
            range: Arc::new(Mutex::new(None)),
            link: AsyncMutex::new(Link::Disconnected),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The node's keys.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Range assigned on join, kept current by the coordinator as
    /// neighbours enter and exit.
    pub fn range(&self) -> Option<KeyRange> {
        *self.range.lock()
    }

    /// Whether the persistent link is up.
    pub async fn is_joined(&self) -> bool {
        let link = self.link.lock().await;
        matches!(*link, Link::Connected(_)) && !link_is_dead(&link)
    }

    /// Join the ring. Returns once the coordinator has acknowledged the join,
    /// after every pushed or relayed key has been stored.
    pub async fn enter(&self) -> Result<KeyRange> {
        let mut link = self.link.lock().await;
        if matches!(*link, Link::Connected(_)) && !link_is_dead(&link) {
            return Err(NodeError::AlreadyJoined.into());
        }

        let transfer = self.config.transfer;
        let mut conn = Connection::connect(self.config.coordinator_addr, transfer.connect_timeout).await?;
        conn.send(ControlRequest::enter(
            self.config.node_id,
            self.config.listen_addr.port(),
        ))
        .await?;

        let (joined_tx, joined_rx) = oneshot::channel();
        let (finished_tx, finished_rx) = oneshot::channel();
        let instructions = InstructionLoop {
            node_id: self.config.node_id,
            config: self.config.clone(),
            store: self.store.clone(),
            range: self.range.clone(),
            joined_tx: Some(joined_tx),
            finished_tx: Some(finished_tx),
        };
        let task = tokio::spawn(instructions.run(conn));

        match tokio::time::timeout(transfer.exchange_timeout(), joined_rx).await {
            Ok(Ok(Ok(range))) => {
                *self.range.lock() = Some(range);
                *link = Link::Connected(Session { task, finished_rx });
                info!(node_id = self.config.node_id, %range, "Joined ring");
                Ok(range)
            }
            Ok(Ok(Err(e))) => {
                let _ = task.await;
                Err(e)
            }
            Ok(Err(_)) => {
                let _ = task.await;
                Err(NetworkError::ConnectionClosed.into())
            }
            Err(elapsed) => {
                task.abort();
                Err(elapsed.into())
            }
        }
    }

    /// Leave the ring. Blocks until the coordinator sends `FINISHED`, after
    /// every local key in the departing range has been streamed away.
    pub async fn exit(&self) -> Result<()> {
        let mut link = self.link.lock().await;
        let session = match &mut *link {
            Link::Connected(session) => session,
            Link::Disconnected => return Err(NodeError::NotJoined.into()),
        };

        let transfer = self.config.transfer;
        let mut request = Connection::connect(self.config.coordinator_addr, transfer.connect_timeout).await?;
        request
            .send(ControlRequest::Exit {
                id: self.config.node_id,
            })
            .await?;

        let outcome = tokio::time::timeout(transfer.exchange_timeout(), async {
            let reply = tokio::select! {
                finished = &mut session.finished_rx => return finished.map_err(|_| link_lost()),
                reply = request.recv() => reply,
            };
            match reply {
                Ok(Some(text)) => match text.parse::<Instruction>() {
                    Ok(Instruction::Rejected { reason }) => Err(Error::from(NodeError::Rejected(reason))),
                    Ok(other) => Err(Error::from(ProtocolError::Unexpected(other.to_string()))),
                    Err(e) => Err(Error::from(e)),
                },
                // The request link closes without a reply once the exit is accepted.
                Ok(None) | Err(_) => (&mut session.finished_rx).await.map_err(|_| link_lost()),
            }
        })
        .await
        .unwrap_or(Err(Error::Timeout));

        match outcome {
            Ok(()) => {
                if let Link::Connected(session) = std::mem::replace(&mut *link, Link::Disconnected) {
                    let _ = session.task.await;
                }
                *self.range.lock() = None;
                info!(node_id = self.config.node_id, keys = self.store.len(), "Left ring");
                Ok(())
            }
            Err(e) => {
                if link_is_dead(&link) {
                    *link = Link::Disconnected;
                    *self.range.lock() = None;
                }
                Err(e)
            }
        }
    }
}

/// The instruction loop stopped without an exit, e.g. the coordinator went away.
fn link_is_dead(link: &Link) -> bool {
    matches!(link, Link::Connected(session) if session.task.is_finished())
}

fn link_lost() -> Error {
    Error::Network(NetworkError::ConnectionClosed)
}

/// Processes coordinator instructions arriving on the persistent link.
struct InstructionLoop {
    node_id: NodeId,
    config: NodeConfig,
    store: Arc<LocalStore>,
    range: Arc<Mutex<Option<KeyRange>>>,
    joined_tx: Option<oneshot::Sender<Result<KeyRange>>>,
    finished_tx: Option<oneshot::Sender<()>>,
}

impl InstructionLoop {
    async fn run(mut self, mut conn: Connection) {
        loop {
            let text = match conn.recv().await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    warn!(node_id = self.node_id, "Coordinator closed the link");
                    break;
                }
                Err(e) => {
                    warn!(node_id = self.node_id, error = %e, "Coordinator link failed");
                    break;
                }
            };

            let instruction = match text.parse::<Instruction>() {
                Ok(instruction) => instruction,
                Err(e) => {
                    warn!(node_id = self.node_id, error = %e, "Ignoring malformed instruction");
                    continue;
                }
            };

            if !self.apply(instruction, &mut conn).await {
                break;
            }
        }
        debug!(node_id = self.node_id, "Instruction loop stopped");
    }

    /// Apply one instruction. Returns false when the link is done.
    async fn apply(&mut self, instruction: Instruction, conn: &mut Connection) -> bool {
        match instruction {
            Instruction::Put { key, value } => {
                debug!(node_id = self.node_id, key, "Storing pushed entry");
                self.store.insert(key, value);
            }
            Instruction::SendDataToServer { range, addr } => {
                match transfer::send_to_peer(&self.store, range, addr, &self.config.transfer).await {
                    Ok(sent) => info!(node_id = self.node_id, %range, to = %addr, keys = sent, "Relayed keys"),
                    Err(e) => warn!(node_id = self.node_id, %range, to = %addr, error = %e, "Relay send failed"),
                }
            }
            Instruction::ConnectToServerAndPut => {
                match transfer::receive_from_peer(
                    &self.store,
                    self.config.listen_addr,
                    conn,
                    &self.config.transfer,
                )
                .await
                {
                    Ok(count) => info!(node_id = self.node_id, keys = count, "Received relayed keys"),
                    Err(e) => warn!(node_id = self.node_id, error = %e, "Relay receive failed"),
                }
            }
            Instruction::SendToBootstrap { range } => {
                match transfer::stream_range(&self.store, range, conn).await {
                    Ok(sent) => info!(node_id = self.node_id, %range, keys = sent, "Returned keys to coordinator"),
                    Err(e) => warn!(node_id = self.node_id, %range, error = %e, "Pull send failed"),
                }
            }
            Instruction::Joined { range } => match self.joined_tx.take() {
                Some(tx) => {
                    *self.range.lock() = Some(range);
                    let _ = tx.send(Ok(range));
                }
                None => warn!(node_id = self.node_id, %range, "Unexpected JOINED"),
            },
            Instruction::Range { range } => {
                info!(node_id = self.node_id, %range, "Range moved");
                *self.range.lock() = Some(range);
            }
            Instruction::Rejected { reason } => match self.joined_tx.take() {
                Some(tx) => {
                    let _ = tx.send(Err(NodeError::Rejected(reason).into()));
                    return false;
                }
                None => warn!(node_id = self.node_id, %reason, "Unexpected REJECTED"),
            },
            Instruction::Finished => {
                if let Some(tx) = self.finished_tx.take() {
                    let _ = tx.send(());
                }
                return false;
            }
        }
        true
    }
}
