//! TCP control server feeding a single-worker request queue.
//!
//! The accept loop only accepts and enqueues. Exactly one worker task owns the
//! [`RequestHandler`] and processes queued connections strictly one after the
//! other, so whatever state the handler owns is never touched concurrently.

use crate::error::Result;
use crate::network::connection::Connection;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Handler for queued control connections.
#[async_trait]
pub trait RequestHandler: Send + 'static {
    /// Fully process one inbound connection before the next is dequeued.
    async fn handle(&mut self, conn: Connection);
}

/// Control server with an accept loop and a single worker.
pub struct ControlServer {
    /// Bound listener.
    listener: TcpListener,

    /// Accepted connections waiting for the worker.
    queue_capacity: usize,

    /// Shutdown signal receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

impl ControlServer {
    /// Bind the server. Returns the server and its shutdown sender.
    pub async fn bind(
        bind_addr: SocketAddr,
        queue_capacity: usize,
    ) -> Result<(Self, mpsc::Sender<()>)> {
        let listener = TcpListener::bind(bind_addr).await?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let server = Self {
            listener,
            queue_capacity: queue_capacity.max(1),
            shutdown_rx,
        };

        Ok((server, shutdown_tx))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run until shutdown. Queued requests are drained before returning.
    pub async fn run<H: RequestHandler>(mut self, handler: H) -> Result<()> {
        let addr = self.local_addr()?;
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(Self::worker_loop(handler, queue_rx));

        info!(%addr, "Control server listening");

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "Accepted connection");
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(error = %e, "Failed to set nodelay");
                            }
                            if queue_tx.send(Connection::new(stream, peer_addr)).await.is_err() {
                                error!("Request worker stopped");
                                break;
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Control server shutting down");
                    break;
                }
            }
        }

        drop(queue_tx);
        if let Err(e) = worker.await {
            error!(error = %e, "Request worker panicked");
        }

        Ok(())
    }

    async fn worker_loop<H: RequestHandler>(mut handler: H, mut queue: mpsc::Receiver<Connection>) {
        while let Some(conn) = queue.recv().await {
            handler.handle(conn).await;
        }
        debug!("Request worker drained");
    }
}
