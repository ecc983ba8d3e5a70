//! Bounded, time-windowed buffer of recently broadcast messages.
//!
//! DESIGN
//! ======
//! Entries are kept in arrival order alongside the `Instant` they were
//! received, so eviction is a cheap pop from the front: anything older than
//! the retention window, then anything beyond capacity. The backlog is not a
//! durable store; it only smooths over brief client reconnects.
//!
//! Sync answers are sorted by the message `timestamp` (stable, so equal
//! timestamps keep arrival order). Timestamps come from sender clocks and may
//! disagree with arrival order.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use envelope::ChatMessage;

struct Entry {
    received_at: Instant,
    message: ChatMessage,
}

pub struct Backlog {
    entries: VecDeque<Entry>,
    capacity: usize,
    retention: Duration,
}

impl Backlog {
    #[must_use]
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self { entries: VecDeque::new(), capacity, retention }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a broadcast message, evicting expired and overflow entries.
    pub fn push(&mut self, message: ChatMessage) {
        self.push_at(message, Instant::now());
    }

    /// Every retained message with `timestamp > since`, oldest first.
    pub fn since(&mut self, since: i64) -> Vec<ChatMessage> {
        self.since_at(since, Instant::now())
    }

    /// Internal: push with explicit receipt time (for testing).
    fn push_at(&mut self, message: ChatMessage, now: Instant) {
        self.prune(now);
        self.entries.push_back(Entry { received_at: now, message });
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Internal: query with explicit current time (for testing).
    fn since_at(&mut self, since: i64, now: Instant) -> Vec<ChatMessage> {
        self.prune(now);
        let mut replay: Vec<ChatMessage> = self
            .entries
            .iter()
            .filter(|e| e.message.timestamp > since)
            .map(|e| e.message.clone())
            .collect();
        replay.sort_by_key(|m| m.timestamp);
        replay
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.saturating_duration_since(front.received_at) <= self.retention {
                break;
            }
            self.entries.pop_front();
        }
    }
}

#[cfg(test)]
#[path = "backlog_test.rs"]
mod tests;
