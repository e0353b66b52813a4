// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cooldown tracking for repeated requests of the same kind.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

/// Remembers when a request was last sent per key and refuses repeats
/// inside the cooldown window.
///
/// Constructed explicitly and passed to whoever needs it.
#[derive(Debug)]
pub struct RequestTracker {
    cooldown: Duration,
    last_sent: DashMap<String, Instant>,
}

impl RequestTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: DashMap::new(),
        }
    }

    pub fn mark_sent(&self, key: impl Into<String>, at: Instant) {
        self.last_sent.insert(key.into(), at);
    }

    pub fn can_send(&self, key: &str) -> bool {
        self.can_send_at(key, Instant::now())
    }

    pub fn can_send_at(&self, key: &str, now: Instant) -> bool {
        match self.last_sent.get(key) {
            Some(last) => now.saturating_duration_since(*last) >= self.cooldown,
            None => true,
        }
    }

    /// Check and mark in one step. Returns false when still cooling down.
    pub fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        match self.last_sent.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
            Entry::Occupied(mut occupied) => {
                if now.saturating_duration_since(*occupied.get()) >= self.cooldown {
                    occupied.insert(now);
                    true
                } else {
                    false
                }
            }
        }
    }
}
