//! Budget tracker
//!
//! Rolling-window cost accounting per identifier. Windows exist only for
//! configured limits and are checked in most-restrictive order (hourly,
//! daily, monthly). Crossing a window's alert threshold without exceeding
//! it reports an alert instead of a violation.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::BudgetConfig;
use crate::rolling::RollingWindow;

/// Budget window granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetWindowKind {
    /// 60 one-minute buckets
    Hourly,
    /// 24 one-hour buckets
    Daily,
    /// 30 one-day buckets
    Monthly,
}

impl BudgetWindowKind {
    /// Window spelling used in results and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Monthly => "monthly",
        }
    }
}

/// Outcome of a budget check
#[derive(Debug, Clone)]
pub struct BudgetCheck {
    /// False when a window is exceeded
    pub allowed: bool,

    /// True when usage crossed the alert threshold without exceeding
    pub alert_triggered: bool,

    /// The violating window, or the fullest window otherwise
    pub window: Option<BudgetWindowKind>,

    /// Limit of the reported window
    pub limit: f64,

    /// Usage inside the reported window
    pub used: f64,

    /// `used / limit` of the reported window
    pub percentage: f64,

    /// Time until the reported window frees budget
    pub retry_after: Duration,
}

impl BudgetCheck {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            alert_triggered: false,
            window: None,
            limit: 0.0,
            used: 0.0,
            percentage: 0.0,
            retry_after: Duration::ZERO,
        }
    }
}

/// Serializable snapshot of a budget tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetState {
    /// Hourly window and its limit
    pub hourly: Option<BudgetWindowState>,

    /// Daily window and its limit
    pub daily: Option<BudgetWindowState>,

    /// Monthly window and its limit
    pub monthly: Option<BudgetWindowState>,

    /// Cost accumulated over the process lifetime
    pub all_time_total: f64,
}

/// One persisted budget window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetWindowState {
    /// Configured limit
    pub limit: f64,

    /// Window contents
    pub window: RollingWindow,
}

struct TrackedWindow {
    kind: BudgetWindowKind,
    limit: f64,
    window: RollingWindow,
}

struct TrackerInner {
    windows: Vec<TrackedWindow>,
    all_time_total: f64,
}

/// Thread-safe per-identifier budget tracker
pub struct BudgetTracker {
    alert_threshold: f64,
    inner: Mutex<TrackerInner>,
}

impl BudgetTracker {
    /// Build a tracker from configuration; `None` when no window is
    /// configured
    pub fn from_config(config: &BudgetConfig) -> Option<Self> {
        if config.is_empty() {
            return None;
        }

        let mut windows = Vec::new();
        if let Some(limit) = config.hourly {
            windows.push(TrackedWindow {
                kind: BudgetWindowKind::Hourly,
                limit,
                window: RollingWindow::hourly(),
            });
        }
        if let Some(limit) = config.daily {
            windows.push(TrackedWindow {
                kind: BudgetWindowKind::Daily,
                limit,
                window: RollingWindow::daily(),
            });
        }
        if let Some(limit) = config.monthly {
            windows.push(TrackedWindow {
                kind: BudgetWindowKind::Monthly,
                limit,
                window: RollingWindow::monthly(),
            });
        }

        Some(Self {
            alert_threshold: config.alert_threshold,
            inner: Mutex::new(TrackerInner {
                windows,
                all_time_total: 0.0,
            }),
        })
    }

    /// Record an actual cost into every window
    pub fn record(&self, cost: f64) {
        self.record_at(cost, Utc::now());
    }

    /// [`BudgetTracker::record`] with an explicit clock
    pub fn record_at(&self, cost: f64, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        for tracked in inner.windows.iter_mut() {
            tracked.window.add_at(cost, now);
        }
        inner.all_time_total += cost;
    }

    /// Check whether an estimated cost fits every window
    pub fn check(&self, estimated: f64) -> BudgetCheck {
        self.check_at(estimated, Utc::now())
    }

    /// [`BudgetTracker::check`] with an explicit clock
    pub fn check_at(&self, estimated: f64, now: DateTime<Utc>) -> BudgetCheck {
        let inner = self.inner.lock();
        if inner.windows.is_empty() {
            return BudgetCheck::unlimited();
        }

        // Most restrictive window first
        for tracked in &inner.windows {
            let used = tracked.window.sum_at(now);
            if used + estimated > tracked.limit {
                return BudgetCheck {
                    allowed: false,
                    alert_triggered: false,
                    window: Some(tracked.kind),
                    limit: tracked.limit,
                    used,
                    percentage: if tracked.limit > 0.0 { used / tracked.limit } else { 1.0 },
                    retry_after: tracked.window.time_until_oldest_expires(now),
                };
            }
        }

        // No violation: report the fullest window, alerting past the
        // threshold
        let fullest = inner
            .windows
            .iter()
            .map(|t| {
                let used = t.window.sum_at(now);
                let pct = if t.limit > 0.0 { used / t.limit } else { 0.0 };
                (t, used, pct)
            })
            .max_by(|a, b| a.2.total_cmp(&b.2));

        match fullest {
            Some((tracked, used, percentage)) => BudgetCheck {
                allowed: true,
                alert_triggered: percentage >= self.alert_threshold,
                window: Some(tracked.kind),
                limit: tracked.limit,
                used,
                percentage,
                retry_after: Duration::ZERO,
            },
            None => BudgetCheck::unlimited(),
        }
    }

    /// Cost accumulated over the process lifetime
    pub fn all_time_total(&self) -> f64 {
        self.inner.lock().all_time_total
    }

    /// Serializable snapshot of the current state
    pub fn snapshot(&self) -> BudgetState {
        let inner = self.inner.lock();
        let find = |kind: BudgetWindowKind| {
            inner
                .windows
                .iter()
                .find(|t| t.kind == kind)
                .map(|t| BudgetWindowState {
                    limit: t.limit,
                    window: t.window.clone(),
                })
        };
        BudgetState {
            hourly: find(BudgetWindowKind::Hourly),
            daily: find(BudgetWindowKind::Daily),
            monthly: find(BudgetWindowKind::Monthly),
            all_time_total: inner.all_time_total,
        }
    }

    /// Replace window contents from a persisted snapshot; the configured
    /// limits and alert threshold stay authoritative
    pub fn restore(&self, state: &BudgetState) {
        let mut inner = self.inner.lock();
        for tracked in inner.windows.iter_mut() {
            let persisted = match tracked.kind {
                BudgetWindowKind::Hourly => state.hourly.as_ref(),
                BudgetWindowKind::Daily => state.daily.as_ref(),
                BudgetWindowKind::Monthly => state.monthly.as_ref(),
            };
            if let Some(persisted) = persisted {
                tracked.window = persisted.window.clone();
            }
        }
        inner.all_time_total = state.all_time_total;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hourly_tracker(limit: f64) -> BudgetTracker {
        BudgetTracker::from_config(&BudgetConfig {
            hourly: Some(limit),
            daily: None,
            monthly: None,
            alert_threshold: 0.8,
        })
        .unwrap()
    }

    #[test]
    fn test_no_windows_means_unlimited() {
        assert!(BudgetTracker::from_config(&BudgetConfig::default()).is_none());
    }

    #[test]
    fn test_alert_threshold_crossing() {
        let tracker = hourly_tracker(10.0);
        tracker.record_at(8.5, at(1_000_000));

        let check = tracker.check_at(0.0, at(1_000_001));
        assert!(check.allowed);
        assert!(check.alert_triggered);
        assert_eq!(check.window, Some(BudgetWindowKind::Hourly));
        assert!((0.85..=0.86).contains(&check.percentage));
    }

    #[test]
    fn test_exceeded_window_blocks() {
        let tracker = hourly_tracker(10.0);
        tracker.record_at(9.5, at(1_000_000));

        let check = tracker.check_at(1.0, at(1_000_001));
        assert!(!check.allowed);
        assert_eq!(check.window, Some(BudgetWindowKind::Hourly));
        assert!(check.retry_after > Duration::ZERO);
    }

    #[test]
    fn test_below_threshold_is_quiet() {
        let tracker = hourly_tracker(10.0);
        tracker.record_at(2.0, at(1_000_000));

        let check = tracker.check_at(0.5, at(1_000_001));
        assert!(check.allowed);
        assert!(!check.alert_triggered);
        assert_eq!(check.percentage, 0.2);
    }

    #[test]
    fn test_most_restrictive_window_reported_first() {
        let tracker = BudgetTracker::from_config(&BudgetConfig {
            hourly: Some(1.0),
            daily: Some(100.0),
            monthly: None,
            alert_threshold: 0.8,
        })
        .unwrap();
        tracker.record_at(2.0, at(1_000_000));

        let check = tracker.check_at(0.0, at(1_000_001));
        assert!(!check.allowed);
        assert_eq!(check.window, Some(BudgetWindowKind::Hourly));
    }

    #[test]
    fn test_spend_falls_out_of_window() {
        let tracker = hourly_tracker(10.0);
        tracker.record_at(9.0, at(1_000_000));

        // More than an hour later the hourly window is empty again
        let check = tracker.check_at(5.0, at(1_000_000 + 3700));
        assert!(check.allowed);
        assert_eq!(check.used, 0.0);
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let tracker = hourly_tracker(10.0);
        tracker.record_at(4.5, at(1_000_000));

        let snapshot = tracker.snapshot();
        let restored = hourly_tracker(10.0);
        restored.restore(&snapshot);

        let check = restored.check_at(0.0, at(1_000_001));
        assert_eq!(check.used, 4.5);
        assert_eq!(restored.all_time_total(), 4.5);
    }
}
