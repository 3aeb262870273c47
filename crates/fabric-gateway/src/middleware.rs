//! Per-client rate limiting.
//!
//! Fixed-window counting per client key (forwarded-for address or a
//! sentinel). Entries are garbage-collected by a background task so memory
//! stays bounded under churn.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct ClientState {
    count: u64,
    window_start: Instant,
}

pub struct RateLimiter {
    clients: DashMap<String, ClientState>,
    max_requests: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            max_requests,
            window,
        }
    }

    /// Returns `true` when the request from `client_key` is allowed.
    pub fn check(&self, client_key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self
            .clients
            .entry(client_key.to_string())
            .or_insert_with(|| ClientState {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count < self.max_requests {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Drop stale windows. Call periodically from a background task.
    pub fn gc(&self) {
        let now = Instant::now();
        self.clients
            .retain(|_, state| now.duration_since(state.window_start) < self.window * 2);
    }
}
