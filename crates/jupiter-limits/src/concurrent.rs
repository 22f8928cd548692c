//! Concurrent request limiter
//!
//! Lock-free counter capped at a configured limit. `acquire` is a single
//! fetch-and-add; an over-limit result is rolled back before returning
//! false. Callers must pair every successful `acquire` with a `release`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free concurrency limiter
pub struct ConcurrentLimiter {
    limit: u64,
    current: AtomicU64,
}

impl ConcurrentLimiter {
    /// Create a limiter allowing up to `limit` outstanding acquisitions
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            current: AtomicU64::new(0),
        }
    }

    /// Try to take a slot
    pub fn acquire(&self) -> bool {
        let previous = self.current.fetch_add(1, Ordering::AcqRel);
        if previous >= self.limit {
            self.current.fetch_sub(1, Ordering::AcqRel);
            false
        } else {
            true
        }
    }

    /// Return a slot taken by a successful [`ConcurrentLimiter::acquire`]
    pub fn release(&self) {
        let result = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
        debug_assert!(result.is_ok(), "release without matching acquire");
    }

    /// Outstanding acquisitions
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Configured limit
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_acquire_release() {
        let limiter = ConcurrentLimiter::new(2);
        assert!(limiter.acquire());
        assert!(limiter.acquire());
        assert!(!limiter.acquire());

        limiter.release();
        assert!(limiter.acquire());
        assert_eq!(limiter.current(), 2);
    }

    #[test]
    fn test_release_without_acquire_does_not_underflow() {
        let limiter = ConcurrentLimiter::new(1);
        limiter.release();
        assert_eq!(limiter.current(), 0);
        assert!(limiter.acquire());
    }

    #[test]
    fn test_outstanding_never_exceeds_limit() {
        use std::sync::atomic::{AtomicU64, Ordering};

        let limiter = Arc::new(ConcurrentLimiter::new(8));
        let holders = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::new();

        for _ in 0..16 {
            let limiter = limiter.clone();
            let holders = holders.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..500 {
                    if limiter.acquire() {
                        let inside = holders.fetch_add(1, Ordering::AcqRel) + 1;
                        assert!(inside <= limiter.limit());
                        holders.fetch_sub(1, Ordering::AcqRel);
                        limiter.release();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(limiter.current(), 0);
    }
}
