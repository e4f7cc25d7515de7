//! TCP device connection

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use super::{Connection, ConnectionError};

/// Write half of a device socket
///
/// Each payload is followed by a newline so the device can frame it.
pub struct TcpConnection {
    writer: Mutex<Option<OwnedWriteHalf>>,
    addr: SocketAddr,
}

impl TcpConnection {
    pub fn new(writer: OwnedWriteHalf, addr: SocketAddr) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            addr,
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn write(&self, payload: Bytes) -> Result<(), ConnectionError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ConnectionError::Closed)?;
        writer.write_all(&payload).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(peer = %self.addr, error = %e, "Socket shutdown failed");
            }
        }
    }

    fn peer(&self) -> String {
        self.addr.to_string()
    }
}
