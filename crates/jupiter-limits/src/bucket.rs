//! Token bucket rate limiter
//!
//! Used for request-count limits. Refill is lazy: every operation first
//! credits `elapsed × refill_rate` tokens, clamped to capacity, then
//! applies itself. Safe for concurrent use; the interior state is behind
//! a mutex.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Thread-safe token bucket
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    inner: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Serializable snapshot of a token bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Bucket capacity
    pub capacity: f64,

    /// Tokens available at snapshot time
    pub tokens: f64,

    /// Refill rate in tokens per second
    pub refill_rate: f64,

    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take `n` tokens; returns false without consuming anything when the
    /// bucket holds fewer than `n`
    pub fn take(&self, n: f64) -> bool {
        self.take_at(n, Instant::now())
    }

    /// [`TokenBucket::take`] with an explicit clock, for deterministic tests
    pub fn take_at(&self, n: f64, now: Instant) -> bool {
        let mut state = self.inner.lock();
        self.refill(&mut state, now);
        if state.tokens >= n {
            state.tokens -= n;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refill
    pub fn available(&self) -> f64 {
        self.available_at(Instant::now())
    }

    /// [`TokenBucket::available`] with an explicit clock
    pub fn available_at(&self, now: Instant) -> f64 {
        let mut state = self.inner.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Time until `n` tokens will be available, zero if they already are
    pub fn time_until_available(&self, n: f64) -> Duration {
        let available = self.available();
        if available >= n || self.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((n - available) / self.refill_rate)
        }
    }

    /// Bucket capacity
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed > Duration::ZERO {
            state.tokens =
                (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Serializable snapshot of the current state
    pub fn snapshot(&self) -> TokenBucketState {
        TokenBucketState {
            capacity: self.capacity,
            tokens: self.available(),
            refill_rate: self.refill_rate,
            taken_at: Utc::now(),
        }
    }

    /// Rebuild a bucket from a persisted snapshot, crediting refill for
    /// the time since the snapshot was taken
    pub fn restore(state: &TokenBucketState) -> Self {
        let elapsed = (Utc::now() - state.taken_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let tokens =
            (state.tokens + elapsed.as_secs_f64() * state.refill_rate).min(state.capacity);
        Self {
            capacity: state.capacity,
            refill_rate: state.refill_rate,
            inner: Mutex::new(BucketState {
                tokens: tokens.max(0.0),
                last_refill: Instant::now(),
            }),
        }
    }
}
