//! Terminal rendering and input parsing for the chat CLI.

use chat_session::{ChatMessage, ConnectionState, SkipReason};

/// `HH:MM` in UTC for a millisecond timestamp.
pub fn clock(timestamp_ms: i64) -> String {
    let minutes = timestamp_ms.div_euclid(60_000);
    let hour = minutes.div_euclid(60).rem_euclid(24);
    let minute = minutes.rem_euclid(60);
    format!("{hour:02}:{minute:02}")
}

/// One history line: `HH:MM [role] user: text (image url)`.
pub fn message_line(message: &ChatMessage, own: bool) -> String {
    let who = if own { "You" } else { message.user.as_str() };
    let mut line = format!(
        "{} [{}] {who}: {}",
        clock(message.timestamp),
        message.role,
        message.text.as_deref().unwrap_or_default()
    );
    if !message.image_message.is_empty() {
        line.push_str(&format!(" ({})", message.image_message));
    }
    line
}

pub fn connection_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Connecting => "connecting...",
        ConnectionState::Open => "connected",
        ConnectionState::Closed => "disconnected",
    }
}

/// Skip reasons worth telling the user about. An empty line is not.
pub fn skip_notice(reason: SkipReason) -> Option<&'static str> {
    match reason {
        SkipReason::NotOpen => Some("not connected; message not sent"),
        SkipReason::Busy => Some("previous message still sending"),
        SkipReason::Uploading => Some("image upload in progress"),
        SkipReason::Empty => None,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Quit,
    Attach(String),
    Detach,
    Say(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.trim() {
        "/quit" | "/exit" => Input::Quit,
        "/detach" => Input::Detach,
        trimmed => match trimmed.strip_prefix("/image ") {
            Some(path) if !path.trim().is_empty() => Input::Attach(path.trim().to_owned()),
            _ => Input::Say(line.to_owned()),
        },
    }
}
