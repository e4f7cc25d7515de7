//! WebSocket Handler
//!
//! Upgrades `GET /api/v1/devices/:id/stream` and registers the socket as an
//! observer of that device. The socket is write-only from the hub's side:
//! anything the client sends apart from a close frame is ignored.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::{ApiResult, AppState};
use crate::connection::{ChannelConnection, Connection};
use crate::device::DeviceId;
use crate::hub::HubError;

/// WebSocket upgrade handler
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Path(raw_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    let id = DeviceId::parse(raw_id).map_err(HubError::from)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id)))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, id: DeviceId) {
    let (mut sender, mut receiver) = socket.split();

    let peer = format!("ws-{}", Uuid::new_v4());
    let (conn, mut rx) = ChannelConnection::new(peer.clone(), state.channel_capacity);
    let conn = Arc::new(conn);

    let key = match state.hub.stream.add_observer(id.clone(), conn.clone()).await {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(device_id = %id, peer = %peer, error = %e, "Observer rejected");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AGAIN,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    let peer_for_send = peer.clone();

    // Task to forward hub frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match String::from_utf8(frame.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(peer = %peer_for_send, error = %e, "Non UTF-8 frame skipped");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                tracing::debug!(peer = %peer_for_send, "WebSocket send failed, closing connection");
                break;
            }
        }
        let _ = sender.close().await;
    });

    let peer_for_recv = peer.clone();

    // Task to watch for the client going away
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => {
                    tracing::debug!(peer = %peer_for_recv, "Client requested close");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(peer = %peer_for_recv, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    state.hub.stream.remove_observer(key).await;
    conn.close().await;
}
