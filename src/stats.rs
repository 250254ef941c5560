//! Server statistics: additive, monotonic counters printed at shutdown.
//!
//! `AtomicU64` with relaxed ordering unconditionally — these are display
//! counters, not a synchronization primitive, and the same `Stats` instance
//! is shared across all three execution models (only Model B actually
//! contends on it).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    bytes_sent: AtomicU64,
    bytes_recv: AtomicU64,
    requests_recv: AtomicU64,
    responses_sent: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_recv(&self, n: u64) {
        self.bytes_recv.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_requests_recv(&self) {
        self.requests_recv.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_responses_sent(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_recv: self.bytes_recv.load(Ordering::Relaxed),
            requests_recv: self.requests_recv.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub requests_recv: u64,
    pub responses_sent: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{bytes_sent: {}, bytes_recv: {}, requests_recv: {}, responses_sent: {}}}",
            self.bytes_sent, self.bytes_recv, self.requests_recv, self.responses_sent
        )
    }
}
