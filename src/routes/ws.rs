//! WebSocket handler: bidirectional envelope relay.
//!
//! DESIGN
//! ======
//! On upgrade, registers a client queue and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by envelope kind
//! - Broadcast frames from the hub → forward to client
//!
//! Dispatch returns the frames meant for the sender only (sync replay or a
//! rejection notice). Chat frames are never answered directly: the sender
//! receives its copy through the same fan-out as every peer.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register queue with the hub
//! 2. Client sends frames → dispatch → replies to sender / publish to all
//! 3. Close → unregister

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use envelope::{Envelope, ErrorFrame, SyncRequest};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services;
use crate::services::relay::RejectError;
use crate::state::AppState;

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();

    // Per-connection queue for frames fanned out by the hub.
    let (client_tx, mut client_rx) = mpsc::channel::<Envelope>(state.config.client_queue);
    services::relay::join(&state, client_id, client_tx).await;

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                let replies = match msg {
                    Message::Text(text) => process_inbound_bytes(&state, client_id, text.as_str().as_bytes()).await,
                    Message::Binary(bytes) => process_inbound_bytes(&state, client_id, &bytes).await,
                    Message::Close(_) => break,
                    _ => continue,
                };
                if send_all(&mut socket, &replies).await.is_err() {
                    break;
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_envelope(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    services::relay::part(&state, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Decode and process one inbound frame; return frames for the sender only.
///
/// Kept separate from the socket so tests can drive dispatch directly.
async fn process_inbound_bytes(state: &AppState, client_id: Uuid, bytes: &[u8]) -> Vec<Envelope> {
    let envelope = match envelope::decode(bytes) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            return vec![ErrorFrame::from_error(&e).into()];
        }
    };

    match envelope {
        Envelope::Chat(message) => {
            info!(%client_id, id = %message.id, "ws: recv chat");
            services::relay::publish(state, message).await;
            vec![]
        }
        Envelope::Sync(SyncRequest { since }) => {
            let replay = services::relay::replay_since(state, since).await;
            info!(%client_id, since, count = replay.len(), "ws: sync replay");
            replay.into_iter().map(Envelope::Chat).collect()
        }
        Envelope::Error(_) => {
            let err = RejectError::UnexpectedFrame("error");
            warn!(%client_id, error = %err, "ws: rejected inbound frame");
            vec![ErrorFrame::from_error(&err).into()]
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_envelope(socket: &mut WebSocket, frame: &Envelope) -> Result<(), axum::Error> {
    let text = envelope::encode_text(frame);
    socket.send(Message::Text(text.into())).await
}

async fn send_all(socket: &mut WebSocket, frames: &[Envelope]) -> Result<(), axum::Error> {
    for frame in frames {
        send_envelope(socket, frame).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
