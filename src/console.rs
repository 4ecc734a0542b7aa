//! Line-oriented operator console for the coordinator and nodes.
//!
//! Each console reads one command per line and writes its answer to the
//! given writer. Neither console touches the ring directly: the coordinator
//! console reads published snapshots and the node console goes through the
//! node's control path.

use crate::cluster::{CoordinatorService, NodeService};
use crate::error::{ProtocolError, Result};
use crate::types::{in_key_space, Key};
use std::io::Write;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;

const COORDINATOR_HELP: &str = "\
commands:
  path          print the ring path
  data          print local keys
  owner <key>   print the member owning a key
  stats         print membership counters
  insert, lookup, delete
  help
  quit";

const NODE_HELP: &str = "\
commands:
  enter   join the ring
  exit    leave the ring
  data    print local keys
  range   print the assigned range
  help
  quit";

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Path,
    Data,
    Owner(Key),
    Stats,
    Insert,
    Lookup,
    Delete,
    Enter,
    Exit,
    Range,
    Help,
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = ProtocolError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let command = words.next().ok_or(ProtocolError::Empty)?;
        let parsed = match command {
            "path" => Self::Path,
            "data" | "printData" => Self::Data,
            "owner" => {
                let key = words
                    .next()
                    .and_then(|w| w.parse::<u32>().ok())
                    .filter(|k| in_key_space(*k))
                    .ok_or_else(|| ProtocolError::Malformed {
                        command: "owner",
                        reason: "expected a key in 0..=1023".to_string(),
                    })?;
                return Ok(Self::Owner(key as Key));
            }
            "stats" => Self::Stats,
            "insert" => Self::Insert,
            "lookup" => Self::Lookup,
            "delete" => Self::Delete,
            "enter" => Self::Enter,
            "exit" => Self::Exit,
            "range" => Self::Range,
            "help" => Self::Help,
            "quit" => Self::Quit,
            other => return Err(ProtocolError::UnknownCommand(other.to_string())),
        };
        Ok(parsed)
    }
}

/// Serve the coordinator console until `quit` or end of input.
pub async fn run_coordinator_console<R, W>(
    service: &CoordinatorService,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<OperatorCommand>() {
            Ok(OperatorCommand::Quit) => break,
            Ok(OperatorCommand::Path) => write!(out, "{}", service.snapshot())?,
            Ok(OperatorCommand::Data) => write!(out, "{}", service.store().dump())?,
            Ok(OperatorCommand::Owner(key)) => match service.snapshot().owner_of(key) {
                Some(member) => writeln!(
                    out,
                    "key {} is owned by node {} {}",
                    key, member.id, member.range
                )?,
                None => writeln!(out, "no owner for key {}", key)?,
            },
            Ok(OperatorCommand::Stats) => write!(out, "{}", service.metrics().snapshot())?,
            Ok(OperatorCommand::Insert) => writeln!(out, "insert is not implemented")?,
            Ok(OperatorCommand::Lookup) => writeln!(out, "lookup is not implemented")?,
            Ok(OperatorCommand::Delete) => writeln!(out, "delete is not implemented")?,
            Ok(OperatorCommand::Help) => writeln!(out, "{}", COORDINATOR_HELP)?,
            Ok(_) | Err(_) => invalid(out, &line)?,
        }
        out.flush()?;
    }
    Ok(())
}

/// Serve the node console until `quit` or end of input.
pub async fn run_node_console<R, W>(node: &NodeService, input: R, out: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<OperatorCommand>() {
            Ok(OperatorCommand::Quit) => break,
            Ok(OperatorCommand::Enter) => match node.enter().await {
                Ok(range) => writeln!(out, "joined with range {}", range)?,
                Err(e) => writeln!(out, "enter failed: {}", e)?,
            },
            Ok(OperatorCommand::Exit) => match node.exit().await {
                Ok(()) => writeln!(out, "left the ring")?,
                Err(e) => writeln!(out, "exit failed: {}", e)?,
            },
            Ok(OperatorCommand::Data) => write!(out, "{}", node.store().dump())?,
            Ok(OperatorCommand::Range) => match node.range() {
                Some(range) => writeln!(out, "node {} owns {}", node.node_id(), range)?,
                None => writeln!(out, "node {} is not in the ring", node.node_id())?,
            },
            Ok(OperatorCommand::Help) => writeln!(out, "{}", NODE_HELP)?,
            Ok(_) | Err(_) => invalid(out, &line)?,
        }
        out.flush()?;
    }
    Ok(())
}

fn invalid<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
    debug!(input = line, "Invalid console command");
    writeln!(out, "invalid command")
}
