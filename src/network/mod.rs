//! Network communication layer.

pub mod codec;
pub mod connection;
pub mod rpc;
pub mod server;

pub use codec::{MessageCodec, MAX_MESSAGE_LEN};
pub use connection::Connection;
pub use rpc::{ControlRequest, Instruction, Record, Reply, EOF_MARKER};
pub use server::{ControlServer, RequestHandler};
