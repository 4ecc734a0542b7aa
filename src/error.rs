//! Error types for the ring store.

use crate::types::{Key, NodeId};
use std::io;
use thiserror::Error;

/// Result type alias for ring store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ring store.
#[derive(Error, Debug)]
pub enum Error {
    /// Membership ring errors.
    #[error("ring error: {0}")]
    Ring(#[from] RingError),

    /// Network communication errors.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Malformed wire messages.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Node lifecycle errors.
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// A push, pull or relay exchange failed part way.
    ///
    /// The ring mutation that triggered the exchange is not rolled back.
    #[error("transfer failed: {0}")]
    TransferIo(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// A peer read or connect exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The service was shut down while the operation was pending.
    #[error("service shut down")]
    Shutdown,
}

impl Error {
    /// Wrap any error raised while an exchange was in flight.
    pub fn transfer(e: impl std::fmt::Display) -> Self {
        Error::TransferIo(e.to_string())
    }
}

/// Membership ring errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Join with an identifier outside the key space, already present, or
    /// one that would leave its owner with an empty range.
    #[error("invalid node id {id}: {reason}")]
    InvalidId { id: u32, reason: &'static str },

    /// No member has the given identifier.
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// The leaving member has no successor to absorb its range.
    #[error("node {0} has no successor to take over its range")]
    LastNodeExit(NodeId),

    /// A key matched no member. The coverage invariant is broken.
    #[error("consistency violation: no member owns key {0}")]
    ConsistencyViolation(Key),
}

/// Network communication errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Connection was closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Frame payload exceeds the 2-byte length prefix.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// Frame payload is not valid UTF-8.
    #[error("invalid utf-8 in frame")]
    InvalidUtf8,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Wire grammar errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Empty message.
    #[error("empty message")]
    Empty,

    /// Unknown command word.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Known command with bad arguments.
    #[error("malformed {command}: {reason}")]
    Malformed {
        command: &'static str,
        reason: String,
    },

    /// A reply arrived that the current exchange does not expect.
    #[error("unexpected message: {0}")]
    Unexpected(String),
}

/// Node lifecycle errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Enter issued while already part of the ring.
    #[error("node already joined")]
    AlreadyJoined,

    /// Exit issued while not part of the ring.
    #[error("node not joined")]
    NotJoined,

    /// The coordinator refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Network(NetworkError::Io(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_error_converts() {
        let err: Error = RingError::NotFound(42).into();
        assert!(matches!(err, Error::Ring(RingError::NotFound(42))));
        assert_eq!(err.to_string(), "ring error: node not found: 42");
    }

    #[test]
    fn test_io_error_is_network() {
        let err: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, Error::Network(NetworkError::Io(_))));
    }

    #[test]
    fn test_transfer_wraps_message() {
        let err = Error::transfer(NetworkError::ConnectionClosed);
        assert_eq!(err.to_string(), "transfer failed: connection closed");
    }
}
