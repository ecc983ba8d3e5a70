//! Session state machine, free of sockets and tasks.
//!
//! DESIGN
//! ======
//! `SessionState` holds everything a chat view renders: connection status,
//! the transient error line, the deduplicated history and the compose box.
//! Transport code feeds it events (`on_open`, `on_frame`, `on_error`,
//! `on_close`) and asks it whether a send may start. It never performs I/O,
//! so every rule here is testable without a relay.

use envelope::{ChatMessage, DecodeError, Envelope, ErrorFrame, SyncRequest};

use crate::seen::SeenIds;
use crate::upload::ImageFile;

pub const RECONNECTING_ERROR: &str = "Connection error. Reconnecting...";
pub const UPLOAD_ERROR: &str = "Failed to upload image";
pub const SEND_ERROR: &str = "Failed to send message";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    Closed,
}

/// Why a send request was ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotOpen,
    Busy,
    Uploading,
    Empty,
}

/// What happened to one inbound frame.
#[derive(Debug)]
pub(crate) enum Received {
    Appended(ChatMessage),
    Duplicate(String),
    Rejected(ErrorFrame),
    Ignored,
    Dropped(DecodeError),
}

#[derive(Debug)]
pub(crate) struct SessionState {
    connection: ConnectionState,
    error: Option<String>,
    seen: SeenIds,
    history: Vec<ChatMessage>,
    draft: String,
    image: Option<ImageFile>,
    sending: bool,
    uploading: bool,
    torn_down: bool,
}

impl SessionState {
    pub(crate) fn new(seen_capacity: usize) -> Self {
        Self {
            connection: ConnectionState::Connecting,
            error: None,
            seen: SeenIds::new(seen_capacity),
            history: Vec::new(),
            draft: String::new(),
            image: None,
            sending: false,
            uploading: false,
            torn_down: false,
        }
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    pub(crate) fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub(crate) fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub(crate) fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub(crate) fn draft(&self) -> &str {
        &self.draft
    }

    pub(crate) fn image(&self) -> Option<&ImageFile> {
        self.image.as_ref()
    }

    pub(crate) fn is_sending(&self) -> bool {
        self.sending
    }

    pub(crate) fn is_uploading(&self) -> bool {
        self.uploading
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    // =========================================================================
    // CONNECTION EVENTS
    // =========================================================================

    pub(crate) fn on_connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    /// Socket opened. Returns the catch-up request to send first, if any.
    pub(crate) fn on_open(&mut self) -> Option<SyncRequest> {
        self.connection = ConnectionState::Open;
        self.error = None;
        self.history
            .iter()
            .map(|m| m.timestamp)
            .max()
            .map(|since| SyncRequest { since })
    }

    /// Socket error. History and seen ids survive; reconnect is automatic.
    pub(crate) fn on_error(&mut self) {
        self.error = Some(RECONNECTING_ERROR.to_owned());
    }

    pub(crate) fn on_close(&mut self) {
        self.connection = ConnectionState::Closed;
    }

    /// Decode and apply one inbound frame. Appends in arrival order.
    pub(crate) fn on_frame(&mut self, bytes: &[u8]) -> Received {
        match envelope::decode(bytes) {
            Ok(Envelope::Chat(message)) => {
                if !self.seen.insert(&message.id) {
                    return Received::Duplicate(message.id);
                }
                self.history.push(message.clone());
                Received::Appended(message)
            }
            Ok(Envelope::Error(frame)) => {
                self.error = Some(frame.message.clone());
                Received::Rejected(frame)
            }
            Ok(Envelope::Sync(_)) => Received::Ignored,
            Err(e) => Received::Dropped(e),
        }
    }

    // =========================================================================
    // COMPOSE + SEND
    // =========================================================================

    pub(crate) fn set_draft(&mut self, text: String) {
        self.draft = text;
    }

    pub(crate) fn attach_image(&mut self, image: Option<ImageFile>) {
        self.image = image;
    }

    /// Start a send if nothing blocks it. Marks the session busy and hands
    /// back the draft and attachment to transmit.
    pub(crate) fn begin_send(&mut self) -> Result<(String, Option<ImageFile>), SkipReason> {
        if self.connection != ConnectionState::Open {
            return Err(SkipReason::NotOpen);
        }
        if self.sending {
            return Err(SkipReason::Busy);
        }
        if self.uploading {
            return Err(SkipReason::Uploading);
        }
        if self.draft.trim().is_empty() && self.image.is_none() {
            return Err(SkipReason::Empty);
        }

        self.sending = true;
        self.error = None;
        Ok((self.draft.clone(), self.image.clone()))
    }

    pub(crate) fn begin_upload(&mut self) {
        self.uploading = true;
    }

    pub(crate) fn finish_upload(&mut self) {
        self.uploading = false;
    }

    /// Abort the send in flight. The draft and attachment stay for a retry.
    pub(crate) fn fail_send(&mut self, error: &str) {
        self.sending = false;
        self.uploading = false;
        self.error = Some(error.to_owned());
    }

    pub(crate) fn complete_send(&mut self) {
        self.sending = false;
        self.draft.clear();
        self.image = None;
    }

    pub(crate) fn tear_down(&mut self) {
        self.torn_down = true;
        self.connection = ConnectionState::Closed;
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
