//! Text message grammars exchanged over framed connections.
//!
//! Every message is a single line of space-separated words. Each direction of
//! each conversation has its own enum so a handler can only ever see the
//! messages that are legal at that point of the protocol.

use crate::error::ProtocolError;
use crate::types::{Key, KeyRange, NodeId};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// End-of-stream marker for pull and relay streams.
pub const EOF_MARKER: &str = "EOF";

/// Request a node sends to the coordinator on a fresh connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// `enter <id> <port>`: join the ring, listening for relays on `port`.
    ///
    /// The id is kept wide so out-of-space values reach ring validation.
    Enter { id: u32, port: u16 },

    /// `exit <id>`: leave the ring.
    Exit { id: NodeId },
}

impl ControlRequest {
    /// Build an enter request for a node.
    pub fn enter(id: NodeId, port: u16) -> Self {
        Self::Enter {
            id: id as u32,
            port,
        }
    }
}

/// Instruction the coordinator sends over a node's persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// `put <key> <val>`: store a pushed entry.
    Put { key: Key, value: String },

    /// `sendDataToServer <start> <end> <ip> <port>`: relay sender side.
    SendDataToServer { range: KeyRange, addr: SocketAddr },

    /// `connectToServerAndPut`: relay receiver side.
    ConnectToServerAndPut,

    /// `sendToBootstrap <start> <end>`: pull sender side.
    SendToBootstrap { range: KeyRange },

    /// `JOINED <start> <end>`: the enter completed with this range.
    Joined { range: KeyRange },

    /// `RANGE <start> <end>`: a neighbour's join or leave moved the node's
    /// range.
    Range { range: KeyRange },

    /// `REJECTED <reason>`: the enter or exit was refused.
    Rejected { reason: String },

    /// `FINISHED`: the exit completed, close the connection.
    Finished,
}

/// Reply a node sends back on its persistent connection during a relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `READY`: the relay receiver is listening.
    Ready,

    /// `RECEIVED <count>`: the relay receiver read the stream to its end.
    Received { count: usize },

    /// `FAILED <reason>`: the relay receiver could not complete.
    Failed { reason: String },
}

/// One element of a pull or relay stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// `<key> <val>`
    Pair { key: Key, value: String },

    /// `EOF`
    Eof,
}

fn malformed(command: &'static str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::Malformed {
        command,
        reason: reason.into(),
    }
}

fn parse_field<T: FromStr>(
    command: &'static str,
    field: &str,
    token: Option<&str>,
) -> Result<T, ProtocolError> {
    let token = token.ok_or_else(|| malformed(command, format!("missing {}", field)))?;
    token
        .parse()
        .map_err(|_| malformed(command, format!("invalid {} {:?}", field, token)))
}

fn parse_range<'a>(
    command: &'static str,
    words: &mut impl Iterator<Item = &'a str>,
) -> Result<KeyRange, ProtocolError> {
    let start = parse_field(command, "start", words.next())?;
    let end = parse_field(command, "end", words.next())?;
    KeyRange::new(start, end).ok_or_else(|| malformed(command, format!("invalid range {}..{}", start, end)))
}

fn parse_pair(command: &'static str, text: &str) -> Result<(Key, String), ProtocolError> {
    let (key, value) = text
        .split_once(' ')
        .ok_or_else(|| malformed(command, "missing value"))?;
    let key = parse_field(command, "key", Some(key))?;
    if value.is_empty() {
        return Err(malformed(command, "missing value"));
    }
    Ok((key, value.to_string()))
}

fn expect_end<'a>(
    command: &'static str,
    mut words: impl Iterator<Item = &'a str>,
) -> Result<(), ProtocolError> {
    match words.next() {
        None => Ok(()),
        Some(extra) => Err(malformed(command, format!("unexpected argument {:?}", extra))),
    }
}

impl FromStr for ControlRequest {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        match words.next() {
            Some("enter") => {
                let id = parse_field("enter", "id", words.next())?;
                let port = parse_field("enter", "port", words.next())?;
                expect_end("enter", words)?;
                Ok(Self::Enter { id, port })
            }
            Some("exit") => {
                let id = parse_field("exit", "id", words.next())?;
                expect_end("exit", words)?;
                Ok(Self::Exit { id })
            }
            Some(other) => Err(ProtocolError::UnknownCommand(other.to_string())),
            None => Err(ProtocolError::Empty),
        }
    }
}

impl fmt::Display for ControlRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter { id, port } => write!(f, "enter {} {}", id, port),
            Self::Exit { id } => write!(f, "exit {}", id),
        }
    }
}

impl FromStr for Instruction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, rest) = s.split_once(' ').unwrap_or((s, ""));
        let mut words = rest.split_whitespace();

        match command {
            "put" => {
                let (key, value) = parse_pair("put", rest)?;
                Ok(Self::Put { key, value })
            }
            "sendDataToServer" => {
                let range = parse_range("sendDataToServer", &mut words)?;
                let ip: IpAddr = parse_field("sendDataToServer", "ip", words.next())?;
                let port: u16 = parse_field("sendDataToServer", "port", words.next())?;
                expect_end("sendDataToServer", words)?;
                Ok(Self::SendDataToServer {
                    range,
                    addr: SocketAddr::new(ip, port),
                })
            }
            "connectToServerAndPut" => {
                expect_end("connectToServerAndPut", words)?;
                Ok(Self::ConnectToServerAndPut)
            }
            "sendToBootstrap" => {
                let range = parse_range("sendToBootstrap", &mut words)?;
                expect_end("sendToBootstrap", words)?;
                Ok(Self::SendToBootstrap { range })
            }
            "JOINED" => {
                let range = parse_range("JOINED", &mut words)?;
                expect_end("JOINED", words)?;
                Ok(Self::Joined { range })
            }
            "RANGE" => {
                let range = parse_range("RANGE", &mut words)?;
                expect_end("RANGE", words)?;
                Ok(Self::Range { range })
            }
            "REJECTED" => Ok(Self::Rejected {
                reason: rest.trim().to_string(),
            }),
            "FINISHED" => {
                expect_end("FINISHED", words)?;
                Ok(Self::Finished)
            }
            "" => Err(ProtocolError::Empty),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { key, value } => write!(f, "put {} {}", key, value),
            Self::SendDataToServer { range, addr } => write!(
                f,
                "sendDataToServer {} {} {} {}",
                range.start,
                range.end,
                addr.ip(),
                addr.port()
            ),
            Self::ConnectToServerAndPut => f.write_str("connectToServerAndPut"),
            Self::SendToBootstrap { range } => {
                write!(f, "sendToBootstrap {} {}", range.start, range.end)
            }
            Self::Joined { range } => write!(f, "JOINED {} {}", range.start, range.end),
            Self::Range { range } => write!(f, "RANGE {} {}", range.start, range.end),
            Self::Rejected { reason } => write!(f, "REJECTED {}", reason),
            Self::Finished => f.write_str("FINISHED"),
        }
    }
}

impl FromStr for Reply {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, rest) = s.split_once(' ').unwrap_or((s, ""));
        match command {
            "READY" => Ok(Self::Ready),
            "RECEIVED" => Ok(Self::Received {
                count: parse_field("RECEIVED", "count", rest.split_whitespace().next())?,
            }),
            "FAILED" => Ok(Self::Failed {
                reason: rest.trim().to_string(),
            }),
            "" => Err(ProtocolError::Empty),
            _ => Err(ProtocolError::Unexpected(s.to_string())),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("READY"),
            Self::Received { count } => write!(f, "RECEIVED {}", count),
            Self::Failed { reason } => write!(f, "FAILED {}", reason),
        }
    }
}

impl FromStr for Record {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == EOF_MARKER {
            return Ok(Self::Eof);
        }
        let (key, value) = parse_pair("record", s)?;
        Ok(Self::Pair { key, value })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pair { key, value } => write!(f, "{} {}", key, value),
            Self::Eof => f.write_str(EOF_MARKER),
        }
    }
}
