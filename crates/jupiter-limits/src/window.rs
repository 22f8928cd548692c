//! Sliding window counter
//!
//! Used for token-count limits. The window is divided into fixed-size
//! buckets keyed by their aligned start time; `add` lands in the current
//! bucket and `sum` prunes buckets that fell out of the window before
//! totalling. Safe for concurrent use.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Thread-safe bucketed sliding window of integer amounts
pub struct SlidingWindow {
    window_secs: i64,
    bucket_secs: i64,
    buckets: Mutex<VecDeque<WindowBucket>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowBucket {
    start: i64,
    amount: u64,
}

/// Serializable snapshot of a sliding window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlidingWindowState {
    /// Window span in seconds
    pub window_secs: i64,

    /// Bucket span in seconds
    pub bucket_secs: i64,

    /// Live buckets at snapshot time
    buckets: Vec<WindowBucket>,
}

impl SlidingWindow {
    /// Create a window of `window` span with `bucket_size` granularity
    pub fn new(window: Duration, bucket_size: Duration) -> Self {
        Self {
            window_secs: window.as_secs().max(1) as i64,
            bucket_secs: bucket_size.as_secs().max(1) as i64,
            buckets: Mutex::new(VecDeque::new()),
        }
    }

    /// Add an amount to the current-time bucket
    pub fn add(&self, amount: u64) {
        self.add_at(amount, Utc::now());
    }

    /// [`SlidingWindow::add`] with an explicit clock
    pub fn add_at(&self, amount: u64, now: DateTime<Utc>) {
        let start = self.align(now.timestamp());
        let mut buckets = self.buckets.lock();
        match buckets.back_mut() {
            Some(bucket) if bucket.start == start => bucket.amount += amount,
            _ => buckets.push_back(WindowBucket { start, amount }),
        }
    }

    /// Total of all buckets still inside the window
    pub fn sum(&self) -> u64 {
        self.sum_at(Utc::now())
    }

    /// [`SlidingWindow::sum`] with an explicit clock
    pub fn sum_at(&self, now: DateTime<Utc>) -> u64 {
        // Prune only buckets strictly older than now - window; one
        // exactly at the cutoff still counts
        let cutoff = now.timestamp() - self.window_secs;
        let mut buckets = self.buckets.lock();
        while buckets.front().is_some_and(|b| b.start < cutoff) {
            buckets.pop_front();
        }
        buckets.iter().map(|b| b.amount).sum()
    }

    /// Bucket granularity
    pub fn bucket_size(&self) -> Duration {
        Duration::from_secs(self.bucket_secs as u64)
    }

    /// Window span
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs as u64)
    }

    fn align(&self, timestamp: i64) -> i64 {
        timestamp / self.bucket_secs * self.bucket_secs
    }

    /// Serializable snapshot of the current state
    pub fn snapshot(&self) -> SlidingWindowState {
        SlidingWindowState {
            window_secs: self.window_secs,
            bucket_secs: self.bucket_secs,
            buckets: self.buckets.lock().iter().cloned().collect(),
        }
    }

    /// Rebuild a window from a persisted snapshot; stale buckets fall out
    /// naturally on the next `sum`
    pub fn restore(state: &SlidingWindowState) -> Self {
        Self {
            window_secs: state.window_secs,
            bucket_secs: state.bucket_secs,
            buckets: Mutex::new(state.buckets.iter().cloned().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_adds_within_one_bucket_accumulate() {
        let window = SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1));
        window.add_at(100, at(1000));
        window.add_at(50, at(1000));
        assert_eq!(window.sum_at(at(1000)), 150);
    }

    #[test]
    fn test_sum_prunes_expired_buckets() {
        let window = SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1));
        window.add_at(100, at(1000));
        window.add_at(25, at(1030));

        assert_eq!(window.sum_at(at(1030)), 125);
        // Strictly after the first bucket leaves the window
        assert_eq!(window.sum_at(at(1061)), 25);
        // Everything expired
        assert_eq!(window.sum_at(at(1200)), 0);
    }

    #[test]
    fn test_bucket_exactly_at_cutoff_still_counts() {
        let window = SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1));
        window.add_at(100, at(1000));
        // now - window == bucket start: the bucket is not yet older than
        // the window
        assert_eq!(window.sum_at(at(1060)), 100);
        // One second later it is strictly older and is pruned
        assert_eq!(window.sum_at(at(1061)), 0);
    }

    #[test]
    fn test_bucket_alignment() {
        let window = SlidingWindow::new(Duration::from_secs(3600), Duration::from_secs(60));
        // 1000 and 1030 share the minute bucket starting at 960
        window.add_at(10, at(1000));
        window.add_at(20, at(1030));

        let snapshot = window.snapshot();
        assert_eq!(snapshot.buckets.len(), 1);
        assert_eq!(snapshot.buckets[0].start, 960);
        assert_eq!(snapshot.buckets[0].amount, 30);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let window = SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1));
        window.add_at(42, at(5000));

        let restored = SlidingWindow::restore(&window.snapshot());
        assert_eq!(restored.sum_at(at(5001)), 42);
    }

    #[test]
    fn test_concurrent_adds() {
        use std::sync::Arc;

        let window = Arc::new(SlidingWindow::new(
            Duration::from_secs(60),
            Duration::from_secs(1),
        ));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let window = window.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    window.add(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(window.sum(), 4000);
    }
}
