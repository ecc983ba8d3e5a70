//! Client session: one chat view's connection to the relay.
//!
//! LIFECYCLE
//! =========
//! `ChatSession::connect` spawns a connection task that owns the socket. The
//! task connects, sends a catch-up sync frame when history exists, then pumps
//! frames both ways until the socket drops. It reconnects forever with
//! exponential backoff until the session is closed.
//!
//! The outbound channel and the session state outlive any single socket, so
//! callers hold one stable handle across reconnects. State mutations are
//! short critical sections on a mutex; `send` awaits the uploader outside it.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use envelope::{ChatMessage, Envelope, new_message_id, now_ms};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::identity::{IdentityProvider, SENDER_ROLE};
use crate::state::{
    ConnectionState, RECONNECTING_ERROR, Received, SEND_ERROR, SessionState, SkipReason, UPLOAD_ERROR,
};
use crate::upload::{ImageFile, UploadError, Uploader};

const EVENT_CAPACITY: usize = 256;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// CONFIG + PUBLIC TYPES
// =============================================================================

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Relay websocket URL, e.g. `ws://localhost:3000/ws`.
    pub url: String,
    /// How many message ids to remember for deduplication.
    pub seen_capacity: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl SessionConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/ws".to_owned(),
            seen_capacity: 1024,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Change notifications for a rendering layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    MessageAppended(ChatMessage),
    Error(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was handed to the socket.
    Sent(ChatMessage),
    /// Nothing was sent.
    Skipped(SkipReason),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("image upload failed: {0}")]
    Upload(#[from] UploadError),
    #[error("connection dropped before the message was sent")]
    Disconnected,
    #[error("session is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(Box<tungstenite::Error>),
    #[error("socket error: {0}")]
    Transport(Box<tungstenite::Error>),
}

// =============================================================================
// SHARED STATE
// =============================================================================

struct Shared {
    state: Mutex<SessionState>,
    outbound: mpsc::UnboundedSender<String>,
    events: broadcast::Sender<SessionEvent>,
    uploader: Arc<dyn Uploader>,
    identity: Arc<dyn IdentityProvider>,
    shutdown: Notify,
    reconnect: watch::Sender<u64>,
}

impl Shared {
    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    /// Apply `f` unless the session was torn down.
    fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_torn_down() {
            return None;
        }
        Some(f(&mut state))
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_connection(&self, f: impl FnOnce(&mut SessionState)) {
        if let Some(state) = self.mutate(|s| {
            f(s);
            s.connection()
        }) {
            self.emit(SessionEvent::ConnectionChanged(state));
        }
    }

    fn receive(&self, bytes: &[u8]) {
        let Some(received) = self.mutate(|s| s.on_frame(bytes)) else {
            return;
        };
        match received {
            Received::Appended(message) => self.emit(SessionEvent::MessageAppended(message)),
            Received::Duplicate(id) => debug!(%id, "duplicate chat message dropped"),
            Received::Rejected(frame) => {
                warn!(code = %frame.code, message = %frame.message, "relay rejected frame");
                self.emit(SessionEvent::Error(frame.message));
            }
            Received::Ignored => {}
            Received::Dropped(e) => debug!(error = %e, "malformed frame dropped"),
        }
    }

    fn fail_send(&self, message: &str) {
        if self.mutate(|s| s.fail_send(message)).is_some() {
            self.emit(SessionEvent::Error(message.to_owned()));
        }
    }
}

// =============================================================================
// SESSION HANDLE
// =============================================================================

/// A live chat session. Dropping it stops the connection task.
pub struct ChatSession {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Start a session and its connection task. Must be called inside a
    /// tokio runtime.
    #[must_use]
    pub fn connect(
        config: SessionConfig,
        uploader: Arc<dyn Uploader>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let (shared, outbound_rx) = Self::build(&config, uploader, identity);
        let reconnect_rx = shared.reconnect.subscribe();
        let task = tokio::spawn(run_connection(shared.clone(), config, outbound_rx, reconnect_rx));
        Self { shared, task: Some(task) }
    }

    fn build(
        config: &SessionConfig,
        uploader: Arc<dyn Uploader>,
        identity: Arc<dyn IdentityProvider>,
    ) -> (Arc<Shared>, mpsc::UnboundedReceiver<String>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (reconnect, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::new(config.seen_capacity)),
            outbound,
            events,
            uploader,
            identity,
            shutdown: Notify::new(),
            reconnect,
        });
        (shared, outbound_rx)
    }

    /// Session without a connection task. Frames the session would write
    /// land on the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(
        uploader: Arc<dyn Uploader>,
        identity: Arc<dyn IdentityProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (shared, outbound_rx) = Self::build(&SessionConfig::default(), uploader, identity);
        (Self { shared, task: None }, outbound_rx)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Local history in arrival order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.shared.read(|s| s.history().to_vec())
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.read(SessionState::connection)
    }

    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.shared.read(|s| s.error().map(str::to_owned))
    }

    #[must_use]
    pub fn draft(&self) -> String {
        self.shared.read(|s| s.draft().to_owned())
    }

    #[must_use]
    pub fn has_image(&self) -> bool {
        self.shared.read(|s| s.image().is_some())
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.shared.read(SessionState::is_sending)
    }

    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.shared.read(SessionState::is_uploading)
    }

    /// Whether `message` was composed by the signed-in user. Nobody owns
    /// anything while the identity has no email: the anonymous fallback
    /// address is shared by every anonymous sender.
    #[must_use]
    pub fn is_own(&self, message: &ChatMessage) -> bool {
        self.shared
            .identity
            .current()
            .and_then(|identity| identity.email)
            .filter(|email| !email.is_empty())
            .is_some_and(|email| email == message.email)
    }

    // -------------------------------------------------------------------------
    // Compose
    // -------------------------------------------------------------------------

    pub fn set_draft(&self, text: impl Into<String>) {
        let text = text.into();
        self.shared.mutate(|s| s.set_draft(text));
    }

    pub fn attach_image(&self, image: ImageFile) {
        self.shared.mutate(|s| s.attach_image(Some(image)));
    }

    pub fn clear_image(&self) {
        self.shared.mutate(|s| s.attach_image(None));
    }

    /// Send the current draft and attachment.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Upload`] if the attachment could not be uploaded
    /// (the draft is kept), [`SendError::Disconnected`] if the socket dropped
    /// while uploading, and [`SendError::Closed`] once the session is closed.
    pub async fn send(&self) -> Result<SendOutcome, SendError> {
        let begun = self.shared.mutate(SessionState::begin_send).ok_or(SendError::Closed)?;
        let (text, image) = match begun {
            Ok(parts) => parts,
            Err(reason) => return Ok(SendOutcome::Skipped(reason)),
        };

        let image_message = match image {
            Some(file) => Some(self.upload(file).await?),
            None => None,
        };

        let identity = self.shared.identity.current().unwrap_or_default().resolve();
        let message = ChatMessage {
            id: new_message_id(),
            user: identity.name,
            text: Some(text).filter(|t| !t.trim().is_empty()),
            email: identity.email,
            image_profile: identity.image,
            image_message: image_message.unwrap_or_default(),
            role: SENDER_ROLE.to_owned(),
            timestamp: now_ms(),
        };
        let frame = envelope::encode_text(&Envelope::Chat(message.clone()));

        let handed_off = self
            .shared
            .mutate(|s| {
                if s.connection() != ConnectionState::Open || self.shared.outbound.send(frame).is_err() {
                    return false;
                }
                s.complete_send();
                true
            })
            .ok_or(SendError::Closed)?;

        if !handed_off {
            self.shared.fail_send(SEND_ERROR);
            return Err(SendError::Disconnected);
        }
        Ok(SendOutcome::Sent(message))
    }

    /// Fill the compose box with `text` and `image`, then [`send`](Self::send).
    /// A send already in flight keeps its compose box and this call is
    /// skipped as busy.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        image: Option<ImageFile>,
    ) -> Result<SendOutcome, SendError> {
        let text = text.into();
        self.shared.mutate(|s| {
            if !s.is_sending() {
                s.set_draft(text);
                s.attach_image(image);
            }
        });
        self.send().await
    }

    async fn upload(&self, file: ImageFile) -> Result<String, SendError> {
        self.shared.mutate(SessionState::begin_upload).ok_or(SendError::Closed)?;
        let uploaded = self.shared.uploader.upload(file).await;
        if self.shared.read(SessionState::is_torn_down) {
            return Err(SendError::Closed);
        }

        match uploaded {
            Ok(url) => {
                self.shared.mutate(SessionState::finish_upload);
                Ok(url)
            }
            Err(e) => {
                warn!(error = %e, "image upload failed");
                self.shared.fail_send(UPLOAD_ERROR);
                Err(SendError::Upload(e))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Drop the current socket and let the connection task reconnect.
    pub fn reconnect(&self) {
        if self.shared.read(SessionState::is_torn_down) {
            return;
        }
        self.shared.reconnect.send_modify(|generation| *generation += 1);
    }

    /// Tear the session down: close the socket and stop the connection task.
    pub async fn close(mut self) {
        if self.shared.mutate(SessionState::tear_down).is_some() {
            self.shared.emit(SessionEvent::ConnectionChanged(ConnectionState::Closed));
        }
        self.shared.shutdown.notify_one();

        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("connection task did not stop in time; aborting");
                task.abort();
            }
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

enum Exit {
    /// Socket ended or a reconnect was requested.
    Dropped,
    Shutdown,
}

async fn run_connection(
    shared: Arc<Shared>,
    config: SessionConfig,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut reconnect: watch::Receiver<u64>,
) {
    let mut backoff = config.initial_backoff;

    loop {
        if shared.read(SessionState::is_torn_down) {
            break;
        }
        shared.set_connection(SessionState::on_connecting);

        let result = connect_and_run(&shared, &config.url, &mut outbound, &mut reconnect).await;
        let opened = !matches!(result, Err(ConnectionError::Connect(_)));
        match result {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Dropped) => info!(url = %config.url, "chat session disconnected"),
            Err(e) => {
                warn!(url = %config.url, error = %e, "chat session connection error");
                if shared.mutate(SessionState::on_error).is_some() {
                    shared.emit(SessionEvent::Error(RECONNECTING_ERROR.to_owned()));
                }
            }
        }
        shared.set_connection(SessionState::on_close);

        if opened {
            backoff = config.initial_backoff;
        }
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            () = shared.shutdown.notified() => break,
        }
        backoff = (backoff * 2).min(config.max_backoff);
    }

    debug!(url = %config.url, "chat session connection task stopped");
}

async fn connect_and_run(
    shared: &Shared,
    url: &str,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    reconnect: &mut watch::Receiver<u64>,
) -> Result<Exit, ConnectionError> {
    let (stream, _) = tokio::select! {
        result = tokio_tungstenite::connect_async(url) => {
            result.map_err(|e| ConnectionError::Connect(Box::new(e)))?
        }
        () = shared.shutdown.notified() => return Ok(Exit::Shutdown),
    };
    let (mut write, mut read) = stream.split();
    let transport = |e: tungstenite::Error| ConnectionError::Transport(Box::new(e));

    // Requests made before this socket existed do not apply to it.
    reconnect.borrow_and_update();

    let Some(sync) = shared.mutate(SessionState::on_open) else {
        let _ = write.send(Message::Close(None)).await;
        return Ok(Exit::Shutdown);
    };
    shared.emit(SessionEvent::ConnectionChanged(ConnectionState::Open));
    info!(%url, "chat session connected");

    if let Some(request) = sync {
        debug!(since = request.since, "requesting missed messages");
        let frame = envelope::encode_text(&Envelope::Sync(request));
        write.send(Message::text(frame)).await.map_err(transport)?;
    }

    loop {
        tokio::select! {
            Some(frame) = outbound.recv() => {
                write.send(Message::text(frame)).await.map_err(transport)?;
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => shared.receive(text.as_bytes()),
                Some(Ok(Message::Binary(bytes))) => shared.receive(&bytes),
                Some(Ok(Message::Close(_))) | None => return Ok(Exit::Dropped),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(transport(e)),
            },
            _ = reconnect.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(Exit::Dropped);
            }
            () = shared.shutdown.notified() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(Exit::Shutdown);
            }
        }
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
