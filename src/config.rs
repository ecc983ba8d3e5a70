//! Relay configuration.
//!
//! Every knob is read from the environment (after `.env` loading in `main`)
//! and falls back to a default when unset or unparsable.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_BACKLOG_CAPACITY: usize = 1000;
const DEFAULT_BACKLOG_RETENTION_SECS: u64 = 300;
const DEFAULT_CLIENT_QUEUE: usize = 256;

#[derive(Clone, Copy, Debug)]
pub struct RelayConfig {
    pub port: u16,
    /// Maximum number of messages kept for sync replay.
    pub backlog_capacity: usize,
    /// Age after which a backlog entry is no longer replayed.
    pub backlog_retention: Duration,
    /// Outbound frames buffered per connection before copies are dropped.
    pub client_queue: usize,
}

impl RelayConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            backlog_capacity: env_parse("RELAY_BACKLOG_CAPACITY", DEFAULT_BACKLOG_CAPACITY),
            backlog_retention: Duration::from_secs(env_parse(
                "RELAY_BACKLOG_RETENTION_SECS",
                DEFAULT_BACKLOG_RETENTION_SECS,
            )),
            client_queue: env_parse("RELAY_CLIENT_QUEUE", DEFAULT_CLIENT_QUEUE).max(1),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
            backlog_retention: Duration::from_secs(DEFAULT_BACKLOG_RETENTION_SECS),
            client_queue: DEFAULT_CLIENT_QUEUE,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
