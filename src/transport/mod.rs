//! Device Transport
//!
//! TCP listeners appliances talk to. Frames are newline-delimited JSON in
//! both directions.
//!
//! - **ConfigServer**: first frame `{"meta": ...}` bootstraps the device and
//!   is answered with its configuration; the socket then stays pooled and
//!   receives every configuration patch until the device disconnects
//! - **DataServer**: each `{"time", "meta", "data"}` frame is ingested and
//!   acknowledged with `{"status", "descr"}`, in read order

mod config_server;
mod data_server;

pub use config_server::ConfigServer;
pub use data_server::DataServer;

use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::api::dto::Ack;
use crate::connection::{write_with_timeout, Connection};
use crate::hub::spawn_isolated;
use crate::shutdown::Shutdown;

/// Errors raised while setting up a listener
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

async fn bind(addr: &str) -> Result<TcpListener, TransportError> {
    TcpListener::bind(addr).await.map_err(|source| TransportError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Accept until shutdown, handling each socket in its own task
async fn accept_loop<F, Fut>(listener: TcpListener, name: &'static str, shutdown: Shutdown, handle: F)
where
    F: Fn(TcpStream, SocketAddr) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        tracing::debug!(peer = %peer, error = %e, "Failed to configure socket");
                    }
                    tracing::debug!(listener = name, peer = %peer, "New connection");
                    spawn_isolated(name, handle(socket, peer));
                }
                Err(e) => {
                    tracing::error!(listener = name, error = %e, "Failed to accept connection");
                }
            },
        }
    }
    tracing::info!(listener = name, "Listener stopped");
}

/// Encode and write one acknowledgement frame
async fn write_ack(conn: &dyn Connection, ack: &Ack, timeout: std::time::Duration) -> bool {
    let frame = match serde_json::to_vec(ack) {
        Ok(frame) => Bytes::from(frame),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode ack");
            return false;
        }
    };
    match write_with_timeout(conn, frame, timeout).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(peer = %conn.peer(), error = %e, "Ack write failed");
            false
        }
    }
}
