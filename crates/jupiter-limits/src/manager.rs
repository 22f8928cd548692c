//! Limits manager
//!
//! Per-identifier coordination of request-rate, token-rate, budget, and
//! concurrency limits. Identifier state is created lazily on first use
//! from configuration (no configuration means unlimited), guarded by a
//! double-checked readers-writer lock, and retained for the process
//! lifetime. Usage snapshots are persisted write-behind through a bounded
//! queue that never blocks the caller and is drained on close.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bucket::TokenBucket;
use crate::budget::BudgetTracker;
use crate::concurrent::ConcurrentLimiter;
use crate::config::{IdentifierLimits, LimitsConfig};
use crate::enforcer::{EnforcementAction, EnforcementOutcome, Enforcer};
use crate::error::LimitsError;
use crate::result::{BudgetInfo, LimitCheckResult, RateLimitInfo};
use crate::storage::{LimitState, RateLimitState, StorageBackend};
use crate::window::SlidingWindow;

const PERSIST_QUEUE_CAPACITY: usize = 1024;

/// Actual usage reported back after the upstream call completes
#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// Identifier the usage belongs to
    pub identifier: String,

    /// Actual total tokens consumed
    pub tokens: u64,

    /// Actual cost
    pub cost: f64,

    /// Model that served the request
    pub model: String,

    /// When the usage occurred
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Create a usage record stamped with the current time
    pub fn new(identifier: impl Into<String>, tokens: u64, cost: f64, model: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            tokens,
            cost,
            model: model.into(),
            timestamp: Utc::now(),
        }
    }
}

struct RequestBucket {
    window: &'static str,
    limit: u64,
    bucket: TokenBucket,
}

struct TokenWindow {
    window: &'static str,
    limit: u64,
    counter: SlidingWindow,
}

struct IdentifierEntry {
    identifier: String,
    limits: IdentifierLimits,
    request_buckets: Vec<RequestBucket>,
    token_windows: Vec<TokenWindow>,
    budget: Option<BudgetTracker>,
    concurrent: Option<ConcurrentLimiter>,
    created_at: DateTime<Utc>,
    last_updated: Mutex<DateTime<Utc>>,
}

/// Per-identifier limits coordinator
pub struct LimitsManager {
    config: LimitsConfig,
    enforcer: Enforcer,
    entries: RwLock<HashMap<String, Arc<IdentifierEntry>>>,
    storage: Option<Arc<dyn StorageBackend>>,
    persist_tx: Mutex<Option<mpsc::Sender<LimitState>>>,
    persist_task: Mutex<Option<JoinHandle<()>>>,
}

impl LimitsManager {
    /// Create a manager without persistence
    pub fn new(config: LimitsConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a manager persisting usage snapshots to a storage backend
    pub fn with_storage(config: LimitsConfig, storage: Arc<dyn StorageBackend>) -> Self {
        Self::build(config, Some(storage))
    }

    fn build(config: LimitsConfig, storage: Option<Arc<dyn StorageBackend>>) -> Self {
        let enforcer = Enforcer::new(
            config.enforcement.default_action,
            config.enforcement.downgrade_map.clone(),
        );

        let (persist_tx, persist_task) = match (&storage, config.persist_usage) {
            (Some(storage), true) => {
                let (tx, mut rx) = mpsc::channel::<LimitState>(PERSIST_QUEUE_CAPACITY);
                let storage = storage.clone();
                let task = tokio::spawn(async move {
                    while let Some(state) = rx.recv().await {
                        if let Err(e) = storage.save(&state).await {
                            // The request already succeeded; in-memory
                            // state stays authoritative
                            warn!(identifier = %state.identifier, "State persistence failed: {}", e);
                        }
                    }
                });
                (Some(tx), Some(task))
            }
            _ => (None, None),
        };

        Self {
            config,
            enforcer,
            entries: RwLock::new(HashMap::new()),
            storage,
            persist_tx: Mutex::new(persist_tx),
            persist_task: Mutex::new(persist_task),
        }
    }

    /// Check every configured limit for an identifier before admission.
    ///
    /// Checks run in order: request rate, token rate, budget. The first
    /// violation is dispatched to the enforcer; crossing a budget alert
    /// threshold without violating reports an alert.
    pub async fn check_limits(
        &self,
        identifier: &str,
        estimated_tokens: u64,
        estimated_cost: f64,
        model: &str,
    ) -> Result<LimitCheckResult, LimitsError> {
        if identifier.trim().is_empty() {
            return Err(LimitsError::InvalidIdentifier(
                "empty identifier".to_string(),
            ));
        }

        let started = Instant::now();
        let result = self
            .check_inner(identifier, estimated_tokens, estimated_cost, model)
            .await;

        histogram!("jupiter_check_duration_seconds", "operation" => "check_limits")
            .record(started.elapsed().as_secs_f64());
        counter!(
            "jupiter_rate_limit_checks_total",
            "identifier" => identifier.to_string(),
            "result" => if result.allowed { "allowed" } else { "rejected" }
        )
        .increment(1);

        Ok(result)
    }

    async fn check_inner(
        &self,
        identifier: &str,
        estimated_tokens: u64,
        estimated_cost: f64,
        model: &str,
    ) -> LimitCheckResult {
        let Some(entry) = self.get_or_create(identifier).await else {
            // No configuration entry means unlimited
            return LimitCheckResult::allowed();
        };

        // Request-rate limits
        for request_bucket in &entry.request_buckets {
            if !request_bucket.bucket.take(1.0) {
                let retry_after = request_bucket.bucket.time_until_available(1.0);
                let outcome = self.enforce(identifier, model);
                return self.rate_limited_result(
                    request_bucket.limit,
                    request_bucket.bucket.available().floor().max(0.0) as u64,
                    request_bucket.window,
                    retry_after,
                    format!(
                        "Request rate limit exceeded ({} per {})",
                        request_bucket.limit, request_bucket.window
                    ),
                    outcome,
                );
            }
        }

        // Token-rate limits: pre-admission against the estimate
        for token_window in &entry.token_windows {
            let used = token_window.counter.sum();
            if used + estimated_tokens > token_window.limit {
                let retry_after = token_window.counter.bucket_size();
                let outcome = self.enforce(identifier, model);
                return self.rate_limited_result(
                    token_window.limit,
                    token_window.limit.saturating_sub(used),
                    token_window.window,
                    retry_after,
                    format!(
                        "Token rate limit exceeded ({} tokens per {})",
                        token_window.limit, token_window.window
                    ),
                    outcome,
                );
            }
        }

        // Budget limits and alert thresholds
        if let Some(budget) = &entry.budget {
            let check = budget.check(estimated_cost);
            if let Some(window) = check.window {
                gauge!(
                    "jupiter_budget_usage_percentage",
                    "identifier" => identifier.to_string(),
                    "window" => window.as_str()
                )
                .set(check.percentage);
            }

            if !check.allowed {
                let outcome = self.enforce(identifier, model);
                let window = check
                    .window
                    .map(|w| w.as_str().to_string())
                    .unwrap_or_default();
                let mut result = LimitCheckResult::allowed();
                result.allowed = outcome.allowed;
                result.action = Some(outcome.action);
                result.downgrade_to = outcome.downgrade_to;
                result.reason = Some(format!("Budget exceeded ({} window)", window));
                result.budget = Some(BudgetInfo {
                    limit: check.limit,
                    used: check.used,
                    remaining: (check.limit - check.used).max(0.0),
                    percentage: check.percentage,
                    reset: Utc::now()
                        + chrono::Duration::from_std(check.retry_after)
                            .unwrap_or(chrono::Duration::zero()),
                    window,
                });
                if !result.allowed {
                    result.retry_after = Some(check.retry_after);
                }
                return result;
            }

            if check.alert_triggered {
                let mut result = LimitCheckResult::allowed();
                result.action = Some(EnforcementAction::Alert);
                result.budget = Some(BudgetInfo {
                    limit: check.limit,
                    used: check.used,
                    remaining: (check.limit - check.used).max(0.0),
                    percentage: check.percentage,
                    reset: Utc::now(),
                    window: check
                        .window
                        .map(|w| w.as_str().to_string())
                        .unwrap_or_default(),
                });
                return result;
            }
        }

        LimitCheckResult::allowed()
    }

    fn rate_limited_result(
        &self,
        limit: u64,
        remaining: u64,
        window: &str,
        retry_after: Duration,
        reason: String,
        outcome: EnforcementOutcome,
    ) -> LimitCheckResult {
        let mut result = LimitCheckResult::allowed();
        result.allowed = outcome.allowed;
        result.action = Some(outcome.action);
        result.downgrade_to = outcome.downgrade_to;
        result.reason = Some(reason);
        result.rate_limit = Some(RateLimitInfo {
            limit,
            remaining,
            reset: Utc::now()
                + chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero()),
            window: window.to_string(),
        });
        if !result.allowed {
            result.retry_after = Some(retry_after);
        }
        result
    }

    fn enforce(&self, identifier: &str, model: &str) -> EnforcementOutcome {
        let outcome = self.enforcer.enforce(model);
        counter!(
            "jupiter_enforcement_actions_total",
            "identifier" => identifier.to_string(),
            "action" => outcome.action.as_str()
        )
        .increment(1);
        outcome
    }

    /// Record actual usage after the upstream call completed
    pub async fn record_usage(&self, record: UsageRecord) -> Result<(), LimitsError> {
        if record.identifier.trim().is_empty() {
            return Err(LimitsError::InvalidIdentifier(
                "empty identifier".to_string(),
            ));
        }

        let started = Instant::now();
        let Some(entry) = self.get_or_create(&record.identifier).await else {
            return Ok(());
        };

        for token_window in &entry.token_windows {
            token_window.counter.add(record.tokens);
        }
        if let Some(budget) = &entry.budget {
            budget.record(record.cost);
        }
        *entry.last_updated.lock() = record.timestamp;

        self.enqueue_persist(&entry);

        histogram!("jupiter_check_duration_seconds", "operation" => "record_usage")
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Try to take a concurrency slot; true when no concurrency limit is
    /// configured. Pair with [`LimitsManager::release_concurrent`].
    pub fn acquire_concurrent(&self, identifier: &str) -> bool {
        match self.entries.read().get(identifier) {
            Some(entry) => entry
                .concurrent
                .as_ref()
                .map_or(true, ConcurrentLimiter::acquire),
            None => true,
        }
    }

    /// Return a slot taken by a successful acquire
    pub fn release_concurrent(&self, identifier: &str) {
        if let Some(entry) = self.entries.read().get(identifier) {
            if let Some(limiter) = &entry.concurrent {
                limiter.release();
            }
        }
    }

    /// Drain the persistence queue and release the storage backend
    pub async fn close(&self) -> Result<(), LimitsError> {
        // Dropping the sender ends the worker loop after the queue drains
        let tx = self.persist_tx.lock().take();
        drop(tx);
        let task = self.persist_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        if let Some(storage) = &self.storage {
            storage.close().await?;
        }
        Ok(())
    }

    async fn get_or_create(&self, identifier: &str) -> Option<Arc<IdentifierEntry>> {
        if let Some(entry) = self.entries.read().get(identifier) {
            return Some(entry.clone());
        }

        let limits = self.config.identifiers.get(identifier)?.clone();

        // Warm-start from persisted state, loaded before taking the write
        // lock; losing the creation race below just discards the copy
        let persisted = match (&self.storage, self.config.persist_usage) {
            (Some(storage), true) => storage
                .load(identifier, limits.dimension)
                .await
                .unwrap_or_default(),
            _ => None,
        };

        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(identifier) {
            return Some(entry.clone());
        }

        debug!(identifier = %identifier, "Creating limiter state");
        let entry = Arc::new(Self::build_entry(identifier, limits, persisted));
        entries.insert(identifier.to_string(), entry.clone());
        Some(entry)
    }

    fn build_entry(
        identifier: &str,
        limits: IdentifierLimits,
        persisted: Option<LimitState>,
    ) -> IdentifierEntry {
        let rates = &limits.rate_limits;
        let mut request_buckets = Vec::new();

        // Capacity follows the window: 2x the per-second rate, 1x the
        // per-minute rate, 1/12 of the per-hour rate
        if let Some(rps) = rates.requests_per_second {
            request_buckets.push(RequestBucket {
                window: "second",
                limit: rps as u64,
                bucket: TokenBucket::new(rps * 2.0, rps),
            });
        }
        if let Some(rpm) = rates.requests_per_minute {
            request_buckets.push(RequestBucket {
                window: "minute",
                limit: rpm as u64,
                bucket: TokenBucket::new(rpm, rpm / 60.0),
            });
        }
        if let Some(rph) = rates.requests_per_hour {
            request_buckets.push(RequestBucket {
                window: "hour",
                limit: rph as u64,
                bucket: TokenBucket::new(rph / 12.0, rph / 3600.0),
            });
        }

        let mut token_windows = Vec::new();
        if let Some(tpm) = rates.tokens_per_minute {
            token_windows.push(TokenWindow {
                window: "minute",
                limit: tpm,
                counter: SlidingWindow::new(Duration::from_secs(60), Duration::from_secs(1)),
            });
        }
        if let Some(tph) = rates.tokens_per_hour {
            token_windows.push(TokenWindow {
                window: "hour",
                limit: tph,
                counter: SlidingWindow::new(Duration::from_secs(3600), Duration::from_secs(60)),
            });
        }

        let budget = BudgetTracker::from_config(&limits.budget);
        let concurrent = rates.max_concurrent.map(ConcurrentLimiter::new);
        let mut created_at = Utc::now();

        // Restore persisted state where its shape still matches the
        // configuration
        if let Some(persisted) = persisted {
            created_at = persisted.created_at;
            if let Some(rate_state) = persisted.rate_limit {
                if rate_state.request_buckets.len() == request_buckets.len() {
                    for (slot, snapshot) in request_buckets
                        .iter_mut()
                        .zip(rate_state.request_buckets.iter())
                    {
                        slot.bucket = TokenBucket::restore(snapshot);
                    }
                }
                if rate_state.token_windows.len() == token_windows.len() {
                    for (slot, snapshot) in
                        token_windows.iter_mut().zip(rate_state.token_windows.iter())
                    {
                        slot.counter = SlidingWindow::restore(snapshot);
                    }
                }
            }
            if let (Some(budget), Some(budget_state)) = (&budget, persisted.budget.as_ref()) {
                budget.restore(budget_state);
            }
        }

        IdentifierEntry {
            identifier: identifier.to_string(),
            limits,
            request_buckets,
            token_windows,
            budget,
            concurrent,
            created_at,
            last_updated: Mutex::new(Utc::now()),
        }
    }

    fn enqueue_persist(&self, entry: &IdentifierEntry) {
        let guard = self.persist_tx.lock();
        let Some(tx) = guard.as_ref() else { return };

        let state = Self::snapshot_entry(entry);
        match tx.try_send(state) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(state)) => {
                counter!("jupiter_persist_dropped_total").increment(1);
                warn!(identifier = %state.identifier, "Persistence queue full, dropping snapshot");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    fn snapshot_entry(entry: &IdentifierEntry) -> LimitState {
        LimitState {
            identifier: entry.identifier.clone(),
            dimension: entry.limits.dimension,
            rate_limit: Some(RateLimitState {
                request_buckets: entry
                    .request_buckets
                    .iter()
                    .map(|rb| rb.bucket.snapshot())
                    .collect(),
                token_windows: entry
                    .token_windows
                    .iter()
                    .map(|tw| tw.counter.snapshot())
                    .collect(),
                concurrent: entry
                    .concurrent
                    .as_ref()
                    .map(ConcurrentLimiter::current)
                    .unwrap_or(0),
            }),
            budget: entry.budget.as_ref().map(BudgetTracker::snapshot),
            created_at: entry.created_at,
            last_updated: *entry.last_updated.lock(),
        }
    }
}
