use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide, append-only fetch counters. Cheap enough to bump on every
/// attempt; read with `snapshot()` for status reporting.
#[derive(Debug, Default)]
pub struct FetchMetrics {
    attempts: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    bytes_fetched: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchMetricsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub retries: u64,
    pub failures: u64,
    pub bytes_fetched: u64,
}

impl FetchMetrics {
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, bytes: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FetchMetricsSnapshot {
        FetchMetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }
}
