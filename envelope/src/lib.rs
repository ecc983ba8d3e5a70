//! Shared envelope model and JSON codec for the chat relay websocket.
//!
//! This crate owns the wire representation used by both the relay server and
//! the client session. Two kinds of frame share one channel: chat frames
//! (a flat JSON object describing a [`ChatMessage`]) and control frames
//! (objects carrying a `type` discriminator, e.g. `{"type":"sync","since":0}`).
//!
//! DESIGN
//! ======
//! Defaults are applied by the *receiving* side. A relay that forwards a raw
//! client payload is therefore safe even when the origin omitted fields, and
//! every decoded [`ChatMessage`] is fully populated except for `text`.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Avatar used when a frame carries no `imageProfile`.
pub const DEFAULT_PROFILE_IMAGE: &str = "/profile-circle-svgrepo-com.svg";

/// Role used when a frame carries no `role`.
pub const DEFAULT_ROLE: &str = "guest";

/// Control frame discriminator key.
pub const FRAME_TYPE: &str = "type";

/// `type` value of a catch-up request.
pub const TYPE_SYNC: &str = "sync";

/// `type` value of a server rejection notice.
pub const TYPE_ERROR: &str = "error";

// =============================================================================
// ERRORS
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Error returned by [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The bytes are not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The JSON value is not an object.
    #[error("frame must be a json object")]
    NotAnObject,
    /// A chat frame with neither a string `text` nor a string `imageMessage`.
    #[error("chat frame requires text or imageMessage")]
    MissingPayload,
    /// A control frame with an unrecognized `type`.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
    /// A sync frame without a `since` cutoff.
    #[error("sync frame requires since")]
    MissingSince,
    /// `type` or `since` holding a value of the wrong JSON type.
    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),
}

impl ErrorCode for DecodeError {
    fn error_code(&self) -> &'static str {
        "E_DECODE"
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// The unit of communication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique identifier, used for de-duplication.
    pub id: String,
    /// Display name.
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Sender identity key; distinguishes own messages from others.
    pub email: String,
    pub image_profile: String,
    /// Attached image URL, empty when there is none.
    pub image_message: String,
    /// Advisory sender classification. Carries no authorization power.
    pub role: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Request for every backlog message newer than `since`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncRequest {
    pub since: i64,
}

/// Server notice that an inbound frame was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorFrame {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ErrorFrame {
    /// Build a rejection notice from a typed error.
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code().to_owned(), message: err.to_string(), retryable: err.retryable() }
    }
}

/// Any frame that can travel over the relay socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    Chat(ChatMessage),
    Sync(SyncRequest),
    Error(ErrorFrame),
}

impl From<ChatMessage> for Envelope {
    fn from(message: ChatMessage) -> Self {
        Self::Chat(message)
    }
}

impl From<SyncRequest> for Envelope {
    fn from(request: SyncRequest) -> Self {
        Self::Sync(request)
    }
}

impl From<ErrorFrame> for Envelope {
    fn from(frame: ErrorFrame) -> Self {
        Self::Error(frame)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Control<'a> {
    Sync { since: i64 },
    Error { code: &'a str, message: &'a str, retryable: bool },
}

// =============================================================================
// CLOCK
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Time-derived message id. The random suffix keeps ids minted in the same
/// millisecond apart.
#[must_use]
pub fn new_message_id() -> String {
    format!("{}-{:04x}", now_ms(), rand::rng().random::<u16>())
}

fn placeholder_user() -> String {
    format!("User{}", rand::rng().random_range(0..1000))
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode an envelope as canonical JSON bytes.
#[must_use]
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    encode_text(envelope).into_bytes()
}

/// Encode an envelope as a JSON string, ready for a websocket text frame.
#[must_use]
pub fn encode_text(envelope: &Envelope) -> String {
    let result = match envelope {
        Envelope::Chat(message) => serde_json::to_string(message),
        Envelope::Sync(request) => serde_json::to_string(&Control::Sync { since: request.since }),
        Envelope::Error(frame) => serde_json::to_string(&Control::Error {
            code: &frame.code,
            message: &frame.message,
            retryable: frame.retryable,
        }),
    };
    // Serializing plain strings and integers cannot fail.
    result.unwrap_or_default()
}

/// Decode one inbound frame and classify it.
///
/// # Errors
///
/// Returns [`DecodeError`] for invalid JSON, non-object frames, chat frames
/// without a string `text` or `imageMessage`, unknown control types, and
/// sync frames without a numeric `since`. Other chat fields holding the wrong
/// JSON type are treated as absent and get their defaults.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    match obj.get(FRAME_TYPE) {
        None | Some(Value::Null) => decode_chat(&obj).map(Envelope::Chat),
        Some(Value::String(kind)) if kind == TYPE_SYNC => decode_sync(&obj).map(Envelope::Sync),
        Some(Value::String(kind)) if kind == TYPE_ERROR => Ok(Envelope::Error(decode_error(&obj))),
        Some(Value::String(kind)) => Err(DecodeError::UnknownType(kind.clone())),
        Some(_) => Err(DecodeError::InvalidField("type")),
    }
}

fn decode_chat(obj: &Map<String, Value>) -> Result<ChatMessage, DecodeError> {
    let text = optional_str(obj, "text");
    if text.is_none() && optional_str(obj, "imageMessage").is_none() {
        return Err(DecodeError::MissingPayload);
    }

    let id = match obj.get("id") {
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => non_empty(obj, "id"),
    };

    Ok(ChatMessage {
        id: id.unwrap_or_else(new_message_id),
        user: non_empty(obj, "user").unwrap_or_else(placeholder_user),
        text,
        email: non_empty(obj, "email").unwrap_or_default(),
        image_profile: non_empty(obj, "imageProfile").unwrap_or_else(|| DEFAULT_PROFILE_IMAGE.to_owned()),
        image_message: non_empty(obj, "imageMessage").unwrap_or_default(),
        role: non_empty(obj, "role").unwrap_or_else(|| DEFAULT_ROLE.to_owned()),
        timestamp: millis(obj, "timestamp")
            .ok()
            .flatten()
            .filter(|ts| *ts != 0)
            .unwrap_or_else(now_ms),
    })
}

fn decode_sync(obj: &Map<String, Value>) -> Result<SyncRequest, DecodeError> {
    let Some(since) = millis(obj, "since")? else {
        return Err(DecodeError::MissingSince);
    };
    Ok(SyncRequest { since })
}

fn decode_error(obj: &Map<String, Value>) -> ErrorFrame {
    ErrorFrame {
        code: non_empty(obj, "code").unwrap_or_else(|| "E_UNKNOWN".to_owned()),
        message: optional_str(obj, "message").unwrap_or_default(),
        retryable: obj
            .get("retryable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

// =============================================================================
// FIELD HELPERS
// =============================================================================

/// String field; absent, `null` and non-string values map to `None`. Empty
/// strings are kept.
fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// String field where an empty string also counts as absent.
fn non_empty(obj: &Map<String, Value>, key: &str) -> Option<String> {
    optional_str(obj, key).filter(|s| !s.is_empty())
}

/// Millisecond field. JSON numbers from browsers may arrive as floats.
fn millis(obj: &Map<String, Value>, key: &'static str) -> Result<Option<i64>, DecodeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                return Ok(Some(v));
            }
            #[allow(clippy::cast_possible_truncation)]
            n.as_f64()
                .filter(|f| f.is_finite())
                .map(|f| Some(f as i64))
                .ok_or(DecodeError::InvalidField(key))
        }
        Some(_) => Err(DecodeError::InvalidField(key)),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
