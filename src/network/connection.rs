//! Framed duplex connection with optional read deadlines.

use crate::error::{Error, NetworkError, ProtocolError, Result};
use crate::network::codec::MessageCodec;
use futures::{SinkExt, StreamExt};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::trace;

/// A persistent framed TCP connection.
#[derive(Debug)]
pub struct Connection {
    framed: Framed<TcpStream, MessageCodec>,
    peer: SocketAddr,
}

impl Connection {
    /// Wrap an established stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            framed: Framed::new(stream, MessageCodec::new()),
            peer,
        }
    }

    /// Connect to `addr`, failing after `timeout`.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await?
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, addr))
    }

    /// Accept exactly one connection from `listener`, failing after `timeout`.
    pub async fn accept(listener: &TcpListener, timeout: Duration) -> Result<Self> {
        let (stream, peer) = tokio::time::timeout(timeout, listener.accept()).await??;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, peer))
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send one message.
    pub async fn send(&mut self, msg: impl Display) -> Result<()> {
        let text = msg.to_string();
        trace!(peer = %self.peer, msg = %text, "Sending message");
        self.framed.send(text).await?;
        Ok(())
    }

    /// Receive the next message, or `None` when the peer closed cleanly.
    pub async fn recv(&mut self) -> Result<Option<String>> {
        match self.framed.next().await {
            Some(Ok(text)) => {
                trace!(peer = %self.peer, msg = %text, "Received message");
                Ok(Some(text))
            }
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Receive the next message within `timeout`. A closed peer is an error.
    pub async fn recv_within(&mut self, timeout: Duration) -> Result<String> {
        tokio::time::timeout(timeout, self.recv())
            .await??
            .ok_or(Error::Network(NetworkError::ConnectionClosed))
    }

    /// Receive and parse the next message within `timeout`.
    pub async fn recv_parsed<T>(&mut self, timeout: Duration) -> Result<T>
    where
        T: FromStr<Err = ProtocolError>,
    {
        let text = self.recv_within(timeout).await?;
        Ok(text.parse()?)
    }

    /// Flush and shut down the write half.
    pub async fn close(mut self) -> Result<()> {
        SinkExt::<String>::close(&mut self.framed).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::rpc::Record;

    async fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            Connection::connect(addr, Duration::from_secs(1)).await.unwrap()
        });
        let server = Connection::accept(&listener, Duration::from_secs(1))
            .await
            .unwrap();
        (client.await.unwrap(), server)
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (mut client, mut server) = pair().await;

        client.send("900 b").await.unwrap();
        client.send(Record::Eof).await.unwrap();

        let first: Record = server.recv_parsed(Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            first,
            Record::Pair {
                key: 900,
                value: "b".to_string()
            }
        );
        assert_eq!(server.recv().await.unwrap(), Some("EOF".to_string()));
    }

    #[tokio::test]
    async fn test_clean_close_is_none() {
        let (client, mut server) = pair().await;

        client.close().await.unwrap();

        assert_eq!(server.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_recv_within_times_out() {
        let (_client, mut server) = pair().await;

        let result = server.recv_within(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_recv_within_reports_closed_peer() {
        let (client, mut server) = pair().await;
        drop(client);

        let result = server.recv_within(Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(Error::Network(NetworkError::ConnectionClosed))
        ));
    }
}
