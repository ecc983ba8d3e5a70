//! Relay service: connection registry, fan-out and sync replay.
//!
//! DESIGN
//! ======
//! Fan-out is best-effort per connection. Each client owns a bounded queue;
//! `try_send` never waits, so a slow or vanished peer loses its copy instead
//! of stalling everyone else. The sender is included in the fan-out: clients
//! confirm delivery by seeing their own message come back and de-duplicate by
//! id.

use envelope::{ChatMessage, Envelope, ErrorCode};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RejectError {
    #[error("unexpected {0} frame from client")]
    UnexpectedFrame(&'static str),
}

impl ErrorCode for RejectError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::UnexpectedFrame(_) => "E_UNEXPECTED_FRAME",
        }
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

pub async fn join(state: &AppState, client_id: Uuid, tx: mpsc::Sender<Envelope>) {
    let mut hub = state.hub.write().await;
    hub.clients.insert(client_id, tx);
    info!(%client_id, connected = hub.clients.len(), "client joined relay");
}

pub async fn part(state: &AppState, client_id: Uuid) {
    let mut hub = state.hub.write().await;
    hub.clients.remove(&client_id);
    info!(%client_id, connected = hub.clients.len(), "client left relay");
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Record a message in the backlog and fan it out to every connected client.
/// Returns the number of queues that accepted the frame.
pub async fn publish(state: &AppState, message: ChatMessage) -> usize {
    let mut guard = state.hub.write().await;
    let hub = &mut *guard;

    hub.backlog.push(message.clone());
    debug!(id = %message.id, backlog = hub.backlog.len(), "backlog append");

    let frame = Envelope::Chat(message);
    let mut delivered = 0;
    for (client_id, tx) in &hub.clients {
        match tx.try_send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) => {
                warn!(%client_id, "relay: client queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%client_id, "relay: client queue closed, dropping frame");
            }
        }
    }
    delivered
}

/// Backlog entries newer than `since`, for the requesting connection only.
pub async fn replay_since(state: &AppState, since: i64) -> Vec<ChatMessage> {
    let mut hub = state.hub.write().await;
    if hub.backlog.is_empty() {
        return Vec::new();
    }
    hub.backlog.since(since)
}

#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;
