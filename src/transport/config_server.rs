//! Device configuration listener

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::{accept_loop, bind, write_ack, TransportError};
use crate::api::dto::{Ack, BootstrapRequest};
use crate::connection::{write_with_timeout, Connection, TcpConnection};
use crate::hub::Hub;
use crate::shutdown::Shutdown;

pub struct ConfigServer {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl ConfigServer {
    pub async fn bind(addr: &str, hub: Arc<Hub>) -> Result<Self, TransportError> {
        let listener = bind(addr).await?;
        tracing::info!(addr = %addr, "Device config listener bound");
        Ok(Self { listener, hub })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve device config connections until shutdown
    pub async fn run_until(self, shutdown: Shutdown) {
        let hub = self.hub;
        let conn_shutdown = shutdown.clone();
        accept_loop(self.listener, "config connection", shutdown, move |socket, peer| {
            handle_connection(Arc::clone(&hub), socket, peer, conn_shutdown.clone())
        })
        .await;
    }
}

async fn handle_connection(hub: Arc<Hub>, socket: TcpStream, peer: SocketAddr, shutdown: Shutdown) {
    let timeout = hub.options().write_timeout;
    let (read, write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    let conn = Arc::new(TcpConnection::new(write, peer));

    let first = match lines.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Read failed before bootstrap");
            return;
        }
    };

    let request: BootstrapRequest = match serde_json::from_str(&first) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(peer = %peer, error = %e, "Malformed bootstrap frame");
            write_ack(conn.as_ref(), &Ack::error(format!("malformed bootstrap frame: {}", e)), timeout).await;
            conn.close().await;
            return;
        }
    };

    let config = match hub.registry.bootstrap(&request.meta).await {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(peer = %peer, dev_id = %request.meta.dev_id, error = %e, "Bootstrap refused");
            write_ack(conn.as_ref(), &Ack::error(e.to_string()), timeout).await;
            conn.close().await;
            return;
        }
    };

    if let Err(e) = write_with_timeout(conn.as_ref(), config.payload.clone(), timeout).await {
        tracing::debug!(peer = %peer, error = %e, "Failed to send config");
        return;
    }

    let id = config.id;
    let key = hub.distributor.register_connection(id.clone(), conn.clone()).await;

    // Devices only listen on this socket; a read returning means it went away
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            line = lines.next_line() => match line {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "Config connection read failed");
                    break;
                }
            },
        }
    }

    if hub.distributor.unregister(&id, key).await {
        tracing::debug!(device_id = %id, peer = %peer, "Config connection released");
    }
    conn.close().await;
}
