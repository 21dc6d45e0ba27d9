use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::rooms::{Payload, RoomRegistry};

/// Shared state for the sync endpoint.
#[derive(Clone)]
pub struct RelayState {
    pub registry: Arc<RoomRegistry>,
    /// Outbound channel capacity per connection. A peer that falls this far
    /// behind is dropped rather than allowed to stall the room.
    pub send_buffer: usize,
}

/// WebSocket upgrade handler for GET /api/sync/{room_id}
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(room_id): Path<String>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, state))
}

/// Drive one connection against one room: join (which queues the replay
/// snapshot as the first outbound message), then relay every received
/// payload into the room until the peer closes or the transport faults.
/// Both exits converge on the same cleanup, which runs exactly once.
async fn handle_socket(socket: WebSocket, room_id: String, state: RelayState) {
    let peer_id = Uuid::new_v4().to_string();
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Payload>(state.send_buffer);

    // Forward queued payloads (snapshot first, then broadcasts) to the
    // socket. Ends when the room drops this peer's sender or the socket
    // write fails.
    let peer_id_clone = peer_id.clone();
    let mut forward = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sender.send(Message::Binary(payload)).await.is_err() {
                break;
            }
        }
        debug!("Outbound task ended for peer {}", peer_id_clone);
    });

    let room = state.registry.join(&room_id, &peer_id, tx);
    info!(
        "Peer {} connected to room {} ({} connected)",
        peer_id,
        room_id,
        room.member_count()
    );

    loop {
        tokio::select! {
            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Binary(data))) => {
                        room.publish(data, &peer_id);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Peer {} closed room {}", peer_id, room_id);
                        break;
                    }
                    Some(Ok(Message::Text(_))) => {
                        debug!("Ignoring text frame from peer {}", peer_id);
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong are answered by the library.
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from peer {}: {}", peer_id, e);
                        break;
                    }
                }
            }
            // The outbound side is gone: either this peer was dropped for
            // falling behind or the socket write failed. Tear down the
            // session the same way as a remote close.
            _ = &mut forward => {
                debug!("Outbound side gone for peer {}, closing session", peer_id);
                break;
            }
        }
    }

    room.leave(&peer_id);
    state.registry.delete_if_empty(&room_id);
    info!("Peer {} disconnected from room {}", peer_id, room_id);
}
