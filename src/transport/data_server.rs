//! Device data listener

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::{accept_loop, bind, write_ack, TransportError};
use crate::api::dto::{Ack, IngestRequest};
use crate::connection::{Connection, TcpConnection};
use crate::hub::Hub;
use crate::shutdown::Shutdown;

pub struct DataServer {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl DataServer {
    pub async fn bind(addr: &str, hub: Arc<Hub>) -> Result<Self, TransportError> {
        let listener = bind(addr).await?;
        tracing::info!(addr = %addr, "Device data listener bound");
        Ok(Self { listener, hub })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve device data connections until shutdown
    pub async fn run_until(self, shutdown: Shutdown) {
        let hub = self.hub;
        let conn_shutdown = shutdown.clone();
        accept_loop(self.listener, "data connection", shutdown, move |socket, peer| {
            handle_connection(Arc::clone(&hub), socket, peer, conn_shutdown.clone())
        })
        .await;
    }
}

async fn handle_connection(hub: Arc<Hub>, socket: TcpStream, peer: SocketAddr, shutdown: Shutdown) {
    let timeout = hub.options().write_timeout;
    let (read, write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let conn = TcpConnection::new(write, peer);

    loop {
        let line = tokio::select! {
            _ = shutdown.wait() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                let ack = ingest_frame(&hub, &line).await;
                if !write_ack(&conn, &ack, timeout).await {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "Data connection read failed");
                break;
            }
        }
    }

    conn.close().await;
}

async fn ingest_frame(hub: &Hub, line: &str) -> Ack {
    let request: IngestRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Ack::error(format!("malformed data frame: {}", e)),
    };

    let payload = Bytes::copy_from_slice(request.data.get().as_bytes());
    match hub.ingestor.ingest(&request.meta, payload, request.time).await {
        Ok(point) => Ack::ok(format!("stored at {}", point.time)),
        Err(e) => {
            tracing::debug!(dev_id = %request.meta.dev_id, error = %e, "Data frame rejected");
            Ack::error(e.to_string())
        }
    }
}
