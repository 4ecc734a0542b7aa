//! Key exchanges run when the ring is split or merged.
//!
//! Three shapes exist, chosen by whether the coordinator itself is one end:
//!
//! - **Push**: the coordinator sends `put` instructions for its own keys.
//! - **Pull**: the coordinator asks a leaving node to stream its keys back.
//! - **Relay**: two nodes exchange keys directly while the coordinator waits
//!   for the receiver's acknowledgment.
//!
//! Senders remove each key only once it has been written to the wire, so a
//! stream cut short leaves every unsent key with the sender.

use crate::config::TransferConfig;
use crate::error::{Error, NetworkError, ProtocolError, Result};
use crate::network::{Connection, Instruction, Record, Reply};
use crate::storage::LocalStore;
use crate::types::KeyRange;
use std::fmt;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Which pair of parties an exchange runs between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeShape {
    /// Coordinator to joining node.
    Push,
    /// Leaving node to coordinator.
    Pull,
    /// Node to node.
    Relay,
}

impl ExchangeShape {
    /// Shape of the exchange for a join split off `owner`.
    pub fn for_join(owner_is_coordinator: bool) -> Self {
        if owner_is_coordinator {
            Self::Push
        } else {
            Self::Relay
        }
    }

    /// Shape of the exchange for a leave absorbed by `successor`.
    pub fn for_leave(successor_is_coordinator: bool) -> Self {
        if successor_is_coordinator {
            Self::Pull
        } else {
            Self::Relay
        }
    }

    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
            Self::Relay => "relay",
        }
    }
}

impl fmt::Display for ExchangeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReport {
    pub shape: ExchangeShape,
    pub range: KeyRange,
    pub keys_moved: usize,
}

/// A member's persistent link as the coordinator sees it.
///
/// Counts relays this member received whose closing `RECEIVED`/`FAILED` has
/// not been read yet. Those replies still arrive, ahead of anything the node
/// sends for a later instruction, so they are drained before the link is read
/// again.
#[derive(Debug)]
pub struct NodeLink {
    conn: Connection,
    unsettled: usize,
}

impl NodeLink {
    pub fn new(conn: Connection) -> Self {
        Self { conn, unsettled: 0 }
    }

    pub fn conn(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Whether every relay reply has been read.
    pub fn is_settled(&self) -> bool {
        self.unsettled == 0
    }

    pub async fn send(&mut self, msg: impl fmt::Display) -> Result<()> {
        self.conn.send(msg).await
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await
    }

    /// Read and discard the closing replies of earlier relays.
    pub async fn settle(&mut self, config: &TransferConfig) -> Result<()> {
        while self.unsettled > 0 {
            match self.conn.recv_parsed::<Reply>(config.relay_timeout()).await? {
                Reply::Ready => debug!(peer = %self.conn.peer_addr(), "Discarding late READY"),
                reply => {
                    debug!(peer = %self.conn.peer_addr(), %reply, "Discarding late relay reply");
                    self.unsettled -= 1;
                }
            }
        }
        Ok(())
    }
}

/// Push every local key in `range` to `receiver` as `put` instructions.
pub async fn push(store: &LocalStore, range: KeyRange, receiver: &mut Connection) -> Result<usize> {
    let mut moved = 0;
    for (key, value) in store.entries_in(range) {
        receiver
            .send(Instruction::Put { key, value })
            .await
            .map_err(in_exchange)?;
        store.remove(key);
        moved += 1;
    }
    debug!(%range, keys = moved, "Push complete");
    Ok(moved)
}

/// Ask `sender` for its keys in `range` and store them locally.
pub async fn pull(
    store: &LocalStore,
    range: KeyRange,
    sender: &mut NodeLink,
    config: &TransferConfig,
) -> Result<usize> {
    sender.settle(config).await.map_err(in_exchange)?;
    sender
        .send(Instruction::SendToBootstrap { range })
        .await
        .map_err(in_exchange)?;
    let moved = receive_stream(store, Some(range), sender.conn(), config).await?;
    debug!(%range, keys = moved, "Pull complete");
    Ok(moved)
}

/// Have `sender` stream its keys in `range` straight to `receiver`.
///
/// `receiver_addr` is where the receiver listens once it has answered
/// `READY`. Returns the count the receiver acknowledged. If this gives up
/// before the receiver's closing reply, `receiver` is left unsettled.
pub async fn relay(
    range: KeyRange,
    receiver: &mut NodeLink,
    receiver_addr: SocketAddr,
    sender: &mut Connection,
    config: &TransferConfig,
) -> Result<usize> {
    receiver.settle(config).await.map_err(in_exchange)?;
    receiver
        .send(Instruction::ConnectToServerAndPut)
        .await
        .map_err(in_exchange)?;
    receiver.unsettled += 1;

    match receiver
        .conn
        .recv_parsed::<Reply>(config.read_timeout)
        .await
        .map_err(in_exchange)?
    {
        Reply::Ready => {}
        Reply::Failed { reason } => {
            receiver.unsettled -= 1;
            return Err(Error::TransferIo(reason));
        }
        other => return Err(unexpected(other)),
    }

    sender
        .send(Instruction::SendDataToServer {
            range,
            addr: receiver_addr,
        })
        .await
        .map_err(in_exchange)?;

    let reply = receiver
        .conn
        .recv_parsed::<Reply>(config.relay_timeout())
        .await
        .map_err(in_exchange)?;
    match reply {
        Reply::Received { count } => {
            receiver.unsettled -= 1;
            debug!(%range, to = %receiver_addr, keys = count, "Relay complete");
            Ok(count)
        }
        Reply::Failed { reason } => {
            receiver.unsettled -= 1;
            Err(Error::TransferIo(reason))
        }
        other => Err(unexpected(other)),
    }
}

/// Stream local keys in `range` over `conn` as records, then `EOF`.
pub async fn stream_range(store: &LocalStore, range: KeyRange, conn: &mut Connection) -> Result<usize> {
    let mut sent = 0;
    for (key, value) in store.entries_in(range) {
        conn.send(Record::Pair { key, value })
            .await
            .map_err(in_exchange)?;
        store.remove(key);
        sent += 1;
    }
    conn.send(Record::Eof).await.map_err(in_exchange)?;
    Ok(sent)
}

/// Read records from `conn` into `store` until `EOF`.
///
/// With `expected` set, a key outside it aborts the stream.
pub async fn receive_stream(
    store: &LocalStore,
    expected: Option<KeyRange>,
    conn: &mut Connection,
    config: &TransferConfig,
) -> Result<usize> {
    let read = async {
        let mut received = 0;
        loop {
            match conn.recv_parsed::<Record>(config.read_timeout).await? {
                Record::Pair { key, value } => {
                    if expected.is_some_and(|range| !range.contains(key)) {
                        let reason = format!("key {} outside stream range", key);
                        return Err(Error::from(ProtocolError::Unexpected(reason)));
                    }
                    store.insert(key, value);
                    received += 1;
                }
                Record::Eof => return Ok::<usize, Error>(received),
            }
        }
    };

    tokio::time::timeout(config.transfer_timeout, read)
        .await
        .map_err(in_exchange)?
        .map_err(in_exchange)
}

/// Relay sender: connect to `addr` and stream local keys in `range`.
pub async fn send_to_peer(
    store: &LocalStore,
    range: KeyRange,
    addr: SocketAddr,
    config: &TransferConfig,
) -> Result<usize> {
    let mut conn = Connection::connect(addr, config.connect_timeout)
        .await
        .map_err(in_exchange)?;
    let sent = stream_range(store, range, &mut conn).await?;
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Relay stream close failed");
    }
    Ok(sent)
}

/// Relay receiver: listen on `listen_addr`, answer `READY` on `control`,
/// accept one sender and store its stream.
///
/// The outcome is reported on `control` as `RECEIVED` or `FAILED`.
pub async fn receive_from_peer(
    store: &LocalStore,
    listen_addr: SocketAddr,
    control: &mut Connection,
    config: &TransferConfig,
) -> Result<usize> {
    let listener = match TcpListener::bind(listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let err = Error::transfer(format!("cannot listen on {}: {}", listen_addr, e));
            report_failure(control, &err).await;
            return Err(err);
        }
    };
    control.send(Reply::Ready).await?;

    let result = async {
        let mut peer = Connection::accept(&listener, config.read_timeout)
            .await
            .map_err(in_exchange)?;
        receive_stream(store, None, &mut peer, config).await
    }
    .await;

    match &result {
        Ok(count) => control.send(Reply::Received { count: *count }).await?,
        Err(e) => report_failure(control, e).await,
    }
    result
}

async fn report_failure(control: &mut Connection, err: &Error) {
    let reply = Reply::Failed {
        reason: err.to_string(),
    };
    if let Err(e) = control.send(reply).await {
        warn!(error = %e, "Failed to report relay failure");
    }
}

fn unexpected(reply: Reply) -> Error {
    Error::transfer(ProtocolError::Unexpected(reply.to_string()))
}

/// Any failure while an exchange is in flight surfaces as `TransferIo`.
fn in_exchange(e: impl Into<Error>) -> Error {
    match e.into() {
        err @ Error::TransferIo(_) => err,
        Error::Network(NetworkError::ConnectionClosed) => {
            Error::TransferIo("peer closed the connection mid-exchange".into())
        }
        other => Error::transfer(other),
    }
}
