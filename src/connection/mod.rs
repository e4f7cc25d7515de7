//! Connections
//!
//! A [`Connection`] is anything the hub can push bytes to: a device's
//! configuration socket or a dashboard websocket. The hub holds connections
//! as `Arc<dyn Connection>` and never learns the transport behind them.
//!
//! - **ChannelConnection**: writes into a bounded mpsc channel drained by a
//!   transport task (websockets) or by tests
//! - **TcpConnection**: newline-delimited writes on a TCP write half
//! - **arena**: generation-checked slots used by the connection registries
//! - **outbox**: ordered write queue in front of one registered connection

pub mod arena;
mod outbox;
mod tcp;

pub use arena::{Arena, SlotKey};
pub use outbox::{Outbox, OutboxSettings};
pub use tcp::TcpConnection;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised while writing to a connection
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Write queue full")]
    Backlogged,
}

/// A live, writable peer
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one payload, exactly as given
    async fn write(&self, payload: Bytes) -> Result<(), ConnectionError>;

    /// Close the connection; later writes fail with `Closed`
    async fn close(&self);

    /// Peer description for logs
    fn peer(&self) -> String;
}

/// Write with an upper bound on how long the peer may stall
pub async fn write_with_timeout(
    conn: &dyn Connection,
    payload: Bytes,
    timeout: Duration,
) -> Result<(), ConnectionError> {
    match tokio::time::timeout(timeout, conn.write(payload)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Timeout(timeout)),
    }
}

/// Connection backed by a bounded channel
///
/// The receiving half is owned by whatever actually talks to the peer.
/// Dropping that receiver makes every later write fail, which is how a dead
/// websocket shows up to the hub.
pub struct ChannelConnection {
    sender: Mutex<Option<mpsc::Sender<Bytes>>>,
    peer: String,
}

impl ChannelConnection {
    /// Create a connection and the receiver that drains it
    pub fn new(peer: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            sender: Mutex::new(Some(tx)),
            peer: peer.into(),
        };
        (conn, rx)
    }

    fn sender(&self) -> Option<mpsc::Sender<Bytes>> {
        self.sender.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn write(&self, payload: Bytes) -> Result<(), ConnectionError> {
        let sender = self.sender().ok_or(ConnectionError::Closed)?;
        sender.send(payload).await.map_err(|_| ConnectionError::Closed)
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

impl std::fmt::Debug for ChannelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConnection")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_write_delivers_exact_bytes() {
        let (conn, mut rx) = ChannelConnection::new("test", 4);
        conn.write(Bytes::from_static(b"{\"a\":1}")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_write_fails_once_receiver_dropped() {
        let (conn, rx) = ChannelConnection::new("test", 4);
        drop(rx);
        assert!(matches!(
            conn.write(Bytes::from_static(b"x")).await,
            Err(ConnectionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_ends_receiver() {
        let (conn, mut rx) = ChannelConnection::new("test", 4);
        conn.close().await;
        assert!(rx.recv().await.is_none());
        assert!(conn.write(Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_stalled_peer_times_out() {
        let (conn, _rx) = ChannelConnection::new("test", 1);
        conn.write(Bytes::from_static(b"fill")).await.unwrap();

        let result = write_with_timeout(&conn, Bytes::from_static(b"x"), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }
}
