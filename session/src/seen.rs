//! Capped set of message ids already rendered by a session.
//!
//! A long-lived session would otherwise grow its dedup set without bound.
//! Once `capacity` ids are held, the oldest recorded id is forgotten first.

use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct SeenIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl SeenIds {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { order: VecDeque::with_capacity(capacity), ids: HashSet::with_capacity(capacity), capacity }
    }

    /// Record `id`. Returns `false` if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_owned());
        self.ids.insert(id.to_owned());
        true
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
