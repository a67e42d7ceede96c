//! Process-wide token bucket gating every expensive operation in the
//! download pipeline.
//!
//! A single atomic watermark, measured in nanoseconds, tracks how far the
//! bucket has been "pre-charged". `consume` advances the watermark by
//! `tokens * refill_interval` via compare-and-swap and only succeeds if the
//! resulting watermark does not overtake the current time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Default bucket size: 60 seconds worth of tokens at the default refill rate.
pub const DEFAULT_BUCKET_SECONDS: u64 = 60;
/// Default refill interval: one token per 100ms.
pub const DEFAULT_REFILL_MILLIS: u64 = 100;

/// A lock-free, non-blocking token bucket.
///
/// Callers never wait: `consume` returns `false` immediately when the
/// request would exceed the bucket, and the caller maps that to a rejection.
pub struct TokenBucket {
    watermark_nanos: AtomicU64,
    refill_interval_nanos: u64,
    bucket_nanos: u64,
}

impl TokenBucket {
    /// Builds a bucket holding `bucket_seconds` worth of tokens, refilling
    /// one token every `refill_millis` milliseconds.
    pub fn new(bucket_seconds: u64, refill_millis: u64) -> Self {
        let refill_interval_nanos = refill_millis * 1_000_000;
        let bucket_nanos = bucket_seconds * 1_000_000_000;
        Self {
            // Start full: the watermark begins one full bucket behind now,
            // so an immediate consume() can spend the whole burst rather
            // than waiting for wall-clock time to catch up to it.
            watermark_nanos: AtomicU64::new(now_nanos().saturating_sub(bucket_nanos)),
            refill_interval_nanos,
            bucket_nanos,
        }
    }

    /// Attempts to atomically acquire `tokens` tokens. Returns `true` iff the
    /// acquisition succeeded.
    pub fn consume(&self, tokens: u64) -> bool {
        let time_required = tokens.saturating_mul(self.refill_interval_nanos);
        loop {
            let now = now_nanos();
            let floor = now.saturating_sub(self.bucket_nanos);
            let current = self.watermark_nanos.load(Ordering::Acquire);
            let base = current.max(floor);
            let candidate = base.saturating_add(time_required);
            if candidate > now {
                return false;
            }
            match self.watermark_nanos.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_SECONDS, DEFAULT_REFILL_MILLIS)
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn admits_within_burst_floor() {
        let bucket = TokenBucket::new(1, 100);
        // 1 second of tokens at 100ms/token = 10 tokens available immediately.
        assert!(bucket.consume(10));
        assert!(!bucket.consume(1));
    }

    #[test]
    fn rejects_when_exceeding_budget() {
        let bucket = TokenBucket::new(1, 1000);
        assert!(bucket.consume(1));
        assert!(!bucket.consume(1));
    }

    #[test]
    fn concurrent_consumers_respect_total_budget() {
        let bucket = Arc::new(TokenBucket::new(1, 100));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let bucket = Arc::clone(&bucket);
            handles.push(thread::spawn(move || bucket.consume(1)));
        }
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert!(successes <= 10);
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(1, 10);
        assert!(bucket.consume(100));
        assert!(!bucket.consume(1));
        thread::sleep(std::time::Duration::from_millis(30));
        assert!(bucket.consume(1));
    }
}
