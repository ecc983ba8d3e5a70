//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. The
//! hub (connected clients plus the backlog) sits behind a single lock so that
//! a backlog insert and the fan-out that follows it are one atomic step:
//! backlog order always equals broadcast order.

use std::collections::HashMap;
use std::sync::Arc;

use envelope::Envelope;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::backlog::Backlog;
use crate::config::RelayConfig;

// =============================================================================
// HUB
// =============================================================================

pub struct Hub {
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Envelope>>,
    /// Recently broadcast messages, replayed on sync requests.
    pub backlog: Backlog,
}

impl Hub {
    #[must_use]
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            clients: HashMap::new(),
            backlog: Backlog::new(config.backlog_capacity, config.backlog_retention),
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Clone is required by Axum; the hub is Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RwLock<Hub>>,
    pub config: RelayConfig,
}

impl AppState {
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self { hub: Arc::new(RwLock::new(Hub::new(&config))), config }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;

    #[must_use]
    pub fn test_app_state() -> AppState {
        AppState::new(RelayConfig::default())
    }

    /// Register a fake connection with the given queue depth.
    pub async fn register_client(state: &AppState, queue: usize) -> (Uuid, mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
        let client_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(queue);
        state.hub.write().await.clients.insert(client_id, tx.clone());
        (client_id, tx, rx)
    }

    #[must_use]
    pub fn chat(id: &str, timestamp: i64, text: &str) -> envelope::ChatMessage {
        envelope::ChatMessage {
            id: id.to_owned(),
            user: "Tester".to_owned(),
            text: Some(text.to_owned()),
            email: "tester@example.com".to_owned(),
            image_profile: envelope::DEFAULT_PROFILE_IMAGE.to_owned(),
            image_message: String::new(),
            role: "user".to_owned(),
            timestamp,
        }
    }
}
