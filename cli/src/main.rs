mod render;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chat_session::{
    ChatSession, ConnectionState, HttpUploader, Identity, ImageFile, NoUploader, SendOutcome,
    SessionConfig, SessionEvent, StaticIdentity, Uploader,
};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::render::Input;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("invalid relay URL: {0}")]
    InvalidRelayUrl(String),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay health check returned HTTP {0}")]
    Unhealthy(u16),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("send failed: {0}")]
    Send(#[from] chat_session::SendError),
    #[error("message not sent: {0:?}")]
    Skipped(chat_session::SkipReason),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Terminal client for the chat relay")]
struct Cli {
    #[arg(long, env = "CHAT_RELAY_URL", default_value = "ws://127.0.0.1:3000/ws")]
    relay_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the relay answers `/healthz`.
    Ping,
    /// Interactive chat: stdin lines are sent, history is printed.
    Chat(ChatArgs),
    /// Send one message and wait for the relay to echo it.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct IdentityArgs {
    #[arg(long, env = "CHAT_NAME")]
    name: Option<String>,

    #[arg(long, env = "CHAT_EMAIL")]
    email: Option<String>,

    /// Avatar URL.
    #[arg(long, env = "CHAT_IMAGE")]
    image: Option<String>,

    /// Image upload endpoint (multipart POST answering `{"url": ...}`).
    #[arg(long, env = "CHAT_UPLOAD_URL")]
    upload_url: Option<String>,
}

#[derive(Args, Debug)]
struct ChatArgs {
    #[command(flatten)]
    identity: IdentityArgs,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    identity: IdentityArgs,

    /// Message text.
    text: Option<String>,

    /// Image file to upload and attach.
    #[arg(long)]
    attach: Option<String>,

    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ping => run_ping(&cli.relay_url).await,
        Command::Chat(args) => run_chat(&cli.relay_url, args).await,
        Command::Send(args) => run_send(&cli.relay_url, args).await,
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_ping(relay_url: &str) -> Result<(), CliError> {
    let url = health_url(relay_url)?;
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

async fn run_chat(relay_url: &str, args: ChatArgs) -> Result<(), CliError> {
    let session = open_session(relay_url, &args.identity);
    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("* type to chat; /image <path> attaches, /detach drops it, /quit exits");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&session, event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match render::parse_input(&line) {
                    Input::Quit => break,
                    Input::Attach(path) => match ImageFile::read(Path::new(&path)).await {
                        Ok(file) => {
                            eprintln!("* attached {} ({} bytes); it goes with the next line", file.file_name, file.bytes.len());
                            session.attach_image(file);
                        }
                        Err(e) => eprintln!("! cannot read {path}: {e}"),
                    },
                    Input::Detach => session.clear_image(),
                    Input::Say(text) => {
                        session.set_draft(text);
                        match session.send().await {
                            Ok(SendOutcome::Sent(_)) => {}
                            Ok(SendOutcome::Skipped(reason)) => {
                                if let Some(notice) = render::skip_notice(reason) {
                                    eprintln!("* {notice}");
                                }
                            }
                            // The session already reported the error event.
                            Err(e) => warn!(error = %e, "send failed"),
                        }
                    }
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn run_send(relay_url: &str, args: SendArgs) -> Result<(), CliError> {
    let wait = Duration::from_secs(args.timeout_secs);
    let session = open_session(relay_url, &args.identity);
    let mut events = session.subscribe();

    // Subscribed before this check, so an open that lands in between is
    // still delivered as an event.
    if session.connection_state() != ConnectionState::Open {
        wait_for_open(&mut events, wait).await?;
    }

    session.set_draft(args.text.unwrap_or_default());
    if let Some(path) = args.attach {
        session.attach_image(ImageFile::read(Path::new(&path)).await?);
    }

    let sent = match session.send().await? {
        SendOutcome::Sent(message) => message,
        SendOutcome::Skipped(reason) => return Err(CliError::Skipped(reason)),
    };

    let echoed = tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::MessageAppended(message)) if message.id == sent.id => return true,
                Err(RecvError::Closed) => return false,
                _ => {}
            }
        }
    })
    .await;
    session.close().await;

    match echoed {
        Ok(true) => {
            println!("{}", render::message_line(&sent, true));
            Ok(())
        }
        _ => Err(CliError::Timeout("relay echo")),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

async fn wait_for_open(events: &mut broadcast::Receiver<SessionEvent>, wait: Duration) -> Result<(), CliError> {
    tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::ConnectionChanged(ConnectionState::Open)) => return Ok(()),
                Err(RecvError::Closed) => return Err(CliError::Timeout("connection")),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    })
    .await
    .map_err(|_| CliError::Timeout("connection"))?
}

fn open_session(relay_url: &str, args: &IdentityArgs) -> ChatSession {
    let identity = Identity {
        name: args.name.clone(),
        email: args.email.clone(),
        image: args.image.clone(),
    };
    let uploader: Arc<dyn Uploader> = match &args.upload_url {
        Some(url) => Arc::new(HttpUploader::new(url.clone())),
        None => Arc::new(NoUploader),
    };
    ChatSession::connect(SessionConfig::new(relay_url), uploader, Arc::new(StaticIdentity::new(identity)))
}

fn print_event(session: &ChatSession, event: SessionEvent) {
    match event {
        SessionEvent::MessageAppended(message) => {
            println!("{}", render::message_line(&message, session.is_own(&message)));
        }
        SessionEvent::ConnectionChanged(state) => eprintln!("* {}", render::connection_label(state)),
        SessionEvent::Error(error) => eprintln!("! {error}"),
    }
}

/// `ws://host/ws` → `http://host/healthz`.
fn health_url(relay_url: &str) -> Result<String, CliError> {
    let (scheme, rest) = if let Some(rest) = relay_url.strip_prefix("ws://") {
        ("http", rest)
    } else if let Some(rest) = relay_url.strip_prefix("wss://") {
        ("https", rest)
    } else {
        return Err(CliError::InvalidRelayUrl(relay_url.to_owned()));
    };
    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err(CliError::InvalidRelayUrl(relay_url.to_owned()));
    }
    Ok(format!("{scheme}://{host}/healthz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_url_maps_scheme_and_drops_path() {
        assert_eq!(health_url("ws://127.0.0.1:3000/ws").ok().as_deref(), Some("http://127.0.0.1:3000/healthz"));
        assert_eq!(health_url("wss://chat.example.com").ok().as_deref(), Some("https://chat.example.com/healthz"));
    }

    #[tokio::test]
    async fn wait_for_open_returns_on_open_event() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(SessionEvent::ConnectionChanged(ConnectionState::Connecting)).expect("send");
        tx.send(SessionEvent::Error("Connection error. Reconnecting...".into())).expect("send");
        tx.send(SessionEvent::ConnectionChanged(ConnectionState::Open)).expect("send");

        let opened = wait_for_open(&mut rx, Duration::from_secs(1)).await;
        assert!(opened.is_ok());
    }

    #[tokio::test]
    async fn wait_for_open_times_out_without_open_event() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(SessionEvent::ConnectionChanged(ConnectionState::Closed)).expect("send");

        let opened = wait_for_open(&mut rx, Duration::from_millis(50)).await;
        assert!(matches!(opened, Err(CliError::Timeout("connection"))));
    }

    #[tokio::test]
    async fn wait_for_open_fails_when_session_is_gone() {
        let (tx, mut rx) = broadcast::channel::<SessionEvent>(8);
        drop(tx);

        let opened = wait_for_open(&mut rx, Duration::from_secs(1)).await;
        assert!(matches!(opened, Err(CliError::Timeout("connection"))));
    }

    #[test]
    fn health_url_rejects_other_schemes() {
        assert!(matches!(health_url("http://host/ws"), Err(CliError::InvalidRelayUrl(_))));
        assert!(matches!(health_url("ws:///ws"), Err(CliError::InvalidRelayUrl(_))));
    }
}
