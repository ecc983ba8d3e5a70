//! Client side of the chat relay.
//!
//! A [`ChatSession`] keeps one chat view connected to the relay: it
//! deduplicates and orders incoming messages, catches up after reconnects
//! with a sync request, and sends the compose box through an optional image
//! [`Uploader`] and an [`IdentityProvider`].

pub mod client;
pub mod identity;
pub mod seen;
pub mod state;
pub mod upload;

pub use client::{ChatSession, ConnectionError, SendError, SendOutcome, SessionConfig, SessionEvent};
pub use envelope::ChatMessage;
pub use identity::{Identity, IdentityProvider, ResolvedIdentity, StaticIdentity};
pub use seen::SeenIds;
pub use state::{ConnectionState, SkipReason};
pub use upload::{HttpUploader, ImageFile, NoUploader, UploadError, Uploader};
