//! End-to-end limits scenarios exercised through the public API

use jupiter_limits::prelude::*;
use jupiter_limits::{
    BudgetConfig, EnforcementConfig, IdentifierLimits, RateLimitConfig, TokenBucket,
};

fn config_with(identifier: &str, limits: IdentifierLimits) -> LimitsConfig {
    let mut config = LimitsConfig::default();
    config.identifiers.insert(identifier.to_string(), limits);
    config
}

#[tokio::test]
async fn threshold_alert() {
    let limits = IdentifierLimits {
        budget: BudgetConfig {
            hourly: Some(10.0),
            alert_threshold: 0.8,
            ..BudgetConfig::default()
        },
        ..IdentifierLimits::default()
    };
    let manager = LimitsManager::new(config_with("team-alpha", limits));

    manager
        .record_usage(UsageRecord::new("team-alpha", 0, 8.50, "gpt-4"))
        .await
        .unwrap();

    let result = manager
        .check_limits("team-alpha", 100, 0.0, "gpt-4")
        .await
        .unwrap();
    assert!(result.allowed);
    assert_eq!(result.action, Some(EnforcementAction::Alert));

    let budget = result.budget.expect("budget info populated");
    assert!(
        (0.85..=0.86).contains(&budget.percentage),
        "percentage = {}",
        budget.percentage
    );
    assert_eq!(budget.limit, 10.0);
}

#[tokio::test]
async fn rate_limit_trip_and_recovery() {
    use std::time::{Duration, Instant};

    // Capacity 2, refill 1 token/sec
    let bucket = TokenBucket::new(2.0, 1.0);
    let now = Instant::now();

    assert!(bucket.take_at(1.0, now));
    assert!(bucket.take_at(1.0, now));
    assert!(!bucket.take_at(1.0, now));

    // After 1.1 seconds one token has refilled
    assert!(bucket.take_at(1.0, now + Duration::from_millis(1100)));
}

#[tokio::test]
async fn rate_limit_trip_through_manager() {
    let limits = IdentifierLimits {
        rate_limits: RateLimitConfig {
            requests_per_second: Some(1.0),
            ..RateLimitConfig::default()
        },
        ..IdentifierLimits::default()
    };
    let manager = LimitsManager::new(config_with("key-1", limits));

    assert!(manager.check_limits("key-1", 0, 0.0, "m").await.unwrap().allowed);
    assert!(manager.check_limits("key-1", 0, 0.0, "m").await.unwrap().allowed);

    let rejected = manager.check_limits("key-1", 0, 0.0, "m").await.unwrap();
    assert!(!rejected.allowed);
    assert_eq!(rejected.http_status(), 429);

    let headers = rejected.header_pairs();
    assert!(headers.iter().any(|(name, _)| name == "X-RateLimit-Limit"));
    assert!(headers.iter().any(|(name, _)| name == "Retry-After"));

    let body = rejected.blocked_body();
    assert_eq!(body["error"]["type"], "rate_limit_exceeded");
}

#[tokio::test]
async fn downgrade_with_mapping_and_fallback() {
    let limits = IdentifierLimits {
        budget: BudgetConfig {
            hourly: Some(5.0),
            ..BudgetConfig::default()
        },
        ..IdentifierLimits::default()
    };
    let mut config = config_with("key-1", limits);
    config.enforcement = EnforcementConfig {
        default_action: EnforcementAction::Downgrade,
        downgrade_map: [("gpt-4".to_string(), "gpt-3.5-turbo".to_string())]
            .into_iter()
            .collect(),
    };
    let manager = LimitsManager::new(config);

    // Exhaust the budget
    manager
        .record_usage(UsageRecord::new("key-1", 0, 6.0, "gpt-4"))
        .await
        .unwrap();

    let result = manager.check_limits("key-1", 0, 0.5, "gpt-4").await.unwrap();
    assert!(result.allowed);
    assert_eq!(result.action, Some(EnforcementAction::Downgrade));
    assert_eq!(result.downgrade_to.as_deref(), Some("gpt-3.5-turbo"));

    // No mapping for this model: fall back to block
    let result = manager
        .check_limits("key-1", 0, 0.5, "llama-x")
        .await
        .unwrap();
    assert!(!result.allowed);
    assert_eq!(result.action, Some(EnforcementAction::Block));
}

#[tokio::test]
async fn sqlite_round_trip_through_manager() {
    use jupiter_limits::{Dimension, SqliteStorage, StorageBackend};
    use std::sync::Arc;

    let dir = tempfile::TempDir::new().unwrap();
    let limits = IdentifierLimits {
        dimension: Dimension::Team,
        budget: BudgetConfig {
            daily: Some(100.0),
            ..BudgetConfig::default()
        },
        ..IdentifierLimits::default()
    };
    let mut config = config_with("team-alpha", limits);
    config.persist_usage = true;

    let storage = Arc::new(SqliteStorage::open(dir.path().join("limits.db")).unwrap());
    let manager = LimitsManager::with_storage(config, storage);

    manager
        .record_usage(UsageRecord::new("team-alpha", 500, 12.5, "gpt-4"))
        .await
        .unwrap();
    manager.close().await.unwrap();

    // A fresh backend over the same file sees the persisted snapshot
    let reopened = SqliteStorage::open(dir.path().join("limits.db")).unwrap();
    let state = reopened
        .load("team-alpha", Dimension::Team)
        .await
        .unwrap()
        .expect("state persisted");
    assert_eq!(state.identifier, "team-alpha");
    assert!(state.budget.is_some());
}

mod invariants {
    use jupiter_limits::{ConcurrentLimiter, TokenBucket};
    use proptest::prelude::*;
    use std::time::{Duration, Instant};

    proptest! {
        // Tokens never exceed capacity, whatever the take/idle sequence
        #[test]
        fn token_bucket_ceiling(
            capacity in 1.0f64..100.0,
            rate in 0.1f64..50.0,
            steps in prop::collection::vec((0.0f64..10.0, 0u64..5000), 1..50)
        ) {
            let bucket = TokenBucket::new(capacity, rate);
            let mut now = Instant::now();
            for (take, advance_ms) in steps {
                now += Duration::from_millis(advance_ms);
                bucket.take_at(take, now);
                let available = bucket.available_at(now);
                prop_assert!(available <= capacity + 1e-9);
                prop_assert!(available >= -1e-9);
            }
        }

        // Outstanding acquisitions never exceed the limit for any
        // acquire/release interleaving
        #[test]
        fn concurrent_limit_bound(
            limit in 1u64..16,
            ops in prop::collection::vec(any::<bool>(), 1..200)
        ) {
            let limiter = ConcurrentLimiter::new(limit);
            let mut held = 0u64;
            for acquire in ops {
                if acquire {
                    if limiter.acquire() {
                        held += 1;
                    }
                } else if held > 0 {
                    limiter.release();
                    held -= 1;
                }
                prop_assert_eq!(limiter.current(), held);
                prop_assert!(limiter.current() <= limit);
            }
        }
    }
}
