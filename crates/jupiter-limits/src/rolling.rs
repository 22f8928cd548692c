//! Rolling window accumulator
//!
//! Fixed-size circular buffer of `(bucket_start, amount)` slots used by
//! the budget tracker. Each slot covers `bucket_size`; the full window is
//! `bucket_size × bucket_count`. A slot whose start fell out of the
//! window is treated as zero and reused in place. Not internally locked;
//! the owning tracker serializes access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Circular rolling window of floating-point amounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow {
    bucket_secs: i64,
    slots: Vec<WindowSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WindowSlot {
    start: i64,
    amount: f64,
}

impl RollingWindow {
    /// Create a window of `bucket_count` slots of `bucket_size` each
    pub fn new(bucket_size: Duration, bucket_count: usize) -> Self {
        Self {
            bucket_secs: bucket_size.as_secs().max(1) as i64,
            slots: vec![WindowSlot { start: 0, amount: 0.0 }; bucket_count.max(1)],
        }
    }

    /// Hourly window: 60 one-minute buckets
    pub fn hourly() -> Self {
        Self::new(Duration::from_secs(60), 60)
    }

    /// Daily window: 24 one-hour buckets
    pub fn daily() -> Self {
        Self::new(Duration::from_secs(3600), 24)
    }

    /// Monthly window: 30 one-day buckets
    pub fn monthly() -> Self {
        Self::new(Duration::from_secs(86400), 30)
    }

    /// Add an amount to the current bucket
    pub fn add(&mut self, amount: f64) {
        self.add_at(amount, Utc::now());
    }

    /// [`RollingWindow::add`] with an explicit clock
    pub fn add_at(&mut self, amount: f64, now: DateTime<Utc>) {
        let start = self.align(now.timestamp());
        let index = self.index_for(start);
        let slot = &mut self.slots[index];
        if slot.start != start {
            slot.start = start;
            slot.amount = 0.0;
        }
        slot.amount += amount;
    }

    /// Total of all buckets still inside the window
    pub fn sum(&self) -> f64 {
        self.sum_at(Utc::now())
    }

    /// [`RollingWindow::sum`] with an explicit clock
    pub fn sum_at(&self, now: DateTime<Utc>) -> f64 {
        // A bucket is outside the window only when start < now - window;
        // one exactly at the cutoff still counts
        let cutoff = now.timestamp() - self.window_secs();
        self.slots
            .iter()
            .filter(|slot| slot.start >= cutoff && slot.start <= now.timestamp())
            .map(|slot| slot.amount)
            .sum()
    }

    /// Window span
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs() as u64)
    }

    /// Time until the oldest live bucket leaves the window
    pub fn time_until_oldest_expires(&self, now: DateTime<Utc>) -> Duration {
        let cutoff = now.timestamp() - self.window_secs();
        self.slots
            .iter()
            .filter(|slot| slot.start >= cutoff && slot.amount > 0.0)
            // A bucket expires at the first instant start < now - window
            .map(|slot| slot.start + self.window_secs() + 1 - now.timestamp())
            .filter(|secs| *secs > 0)
            .min()
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(Duration::ZERO)
    }

    fn window_secs(&self) -> i64 {
        self.bucket_secs * self.slots.len() as i64
    }

    fn align(&self, timestamp: i64) -> i64 {
        timestamp / self.bucket_secs * self.bucket_secs
    }

    fn index_for(&self, aligned: i64) -> usize {
        ((aligned / self.bucket_secs) % self.slots.len() as i64) as usize
    }
}
