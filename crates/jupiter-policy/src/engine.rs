//! Policy engine orchestrator
//!
//! Drives policy iteration in deterministic priority order, enforces
//! layered rule/policy deadlines, applies the fail-safe mode to every
//! error, and synthesizes the single composite decision. The published
//! policy snapshot is an atomically swapped immutable list: readers hold
//! a reference for one evaluation, reload builds and validates a fresh
//! list off to the side and swaps the pointer.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use jupiter_core::{EnrichedRequest, EnrichedResponse, Error, Result};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{EngineConfig, FailSafeMode};
use crate::context::{
    Decision, DecisionAction, EvalTarget, EvaluationContext, MatchedRule,
};
use crate::executor::ActionExecutor;
use crate::matcher::ConditionMatcher;
use crate::patterns::PatternCache;
use crate::priority;
use crate::rule::Policy;
use crate::source::{PolicyEvent, PolicySource};

const ENGINE_ERROR_REASON: &str = "Policy evaluation error";
const ENGINE_ERROR_STATUS: u16 = 500;

/// An immutable, validated, priority-normalized policy set
pub struct PolicySnapshot {
    /// Policies in evaluation order
    pub policies: Vec<Arc<Policy>>,

    /// Monotonic snapshot version
    pub version: u64,

    /// When this snapshot was published
    pub loaded_at: DateTime<Utc>,
}

impl PolicySnapshot {
    fn empty() -> Self {
        Self {
            policies: Vec::new(),
            version: 0,
            loaded_at: Utc::now(),
        }
    }
}

/// Policy evaluation engine
pub struct PolicyEngine {
    config: EngineConfig,
    source: Arc<dyn PolicySource>,
    snapshot: ArcSwap<PolicySnapshot>,
    patterns: Arc<PatternCache>,
    matcher: ConditionMatcher,
    executor: ActionExecutor,
    next_version: AtomicU64,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl PolicyEngine {
    /// Create an engine: loads the initial policy set from the source and
    /// subscribes to its change events for hot reload.
    ///
    /// Startup fails if the initial set does not validate.
    pub async fn new(config: EngineConfig, source: Arc<dyn PolicySource>) -> Result<Arc<Self>> {
        let patterns = Arc::new(PatternCache::new());
        let matcher = ConditionMatcher::new(patterns.clone(), &config);

        let engine = Arc::new(Self {
            config,
            source,
            snapshot: ArcSwap::from_pointee(PolicySnapshot::empty()),
            patterns,
            matcher,
            executor: ActionExecutor::new(),
            next_version: AtomicU64::new(1),
            watcher: Mutex::new(None),
        });

        engine.reload_policies().await?;

        if let Some(events) = engine.source.subscribe() {
            let handle = tokio::spawn(Self::watch(Arc::downgrade(&engine), events));
            *engine.watcher.lock() = Some(handle);
        }

        Ok(engine)
    }

    /// Evaluate the pre-request policies for an enriched request
    pub async fn evaluate_request(&self, request: &EnrichedRequest) -> Decision {
        self.evaluate(EvalTarget::Request(request)).await
    }

    /// Evaluate the post-response policies for an enriched response
    pub async fn evaluate_response(&self, response: &EnrichedResponse) -> Decision {
        self.evaluate(EvalTarget::Response(response)).await
    }

    /// Reload from the source: validate, normalize priorities, and swap
    /// the snapshot atomically. A failed reload leaves the previous
    /// snapshot in place.
    pub async fn reload_policies(&self) -> Result<()> {
        let result = self.try_reload().await;
        match &result {
            Ok(count) => {
                counter!("jupiter_policy_reloads_total", "result" => "ok").increment(1);
                info!(policies = *count, "Published policy snapshot");
            }
            Err(e) => {
                counter!("jupiter_policy_reloads_total", "result" => "error").increment(1);
                warn!("Policy reload rejected, keeping previous snapshot: {}", e);
            }
        }
        result.map(|_| ())
    }

    async fn try_reload(&self) -> Result<usize> {
        let mut policies = self.source.load().await?;
        self.validate(&policies)?;
        priority::normalize(&mut policies);

        let count = policies.len();
        let snapshot = PolicySnapshot {
            policies: policies.into_iter().map(Arc::new).collect(),
            version: self.next_version.fetch_add(1, Ordering::Relaxed),
            loaded_at: Utc::now(),
        };
        self.snapshot.store(Arc::new(snapshot));
        Ok(count)
    }

    fn validate(&self, policies: &[Policy]) -> Result<()> {
        if policies.len() > self.config.max_policies {
            return Err(Error::validation(format!(
                "{} policies exceeds the limit of {}",
                policies.len(),
                self.config.max_policies
            )));
        }

        for policy in policies {
            if policy.name.is_empty() {
                return Err(Error::validation("policy with empty name"));
            }
            if policy.rules.len() > self.config.max_rules_per_policy {
                return Err(Error::validation(format!(
                    "policy '{}' has {} rules, exceeding the limit of {}",
                    policy.name,
                    policy.rules.len(),
                    self.config.max_rules_per_policy
                )));
            }

            // Pre-compile every `matches` pattern so a malformed regex is
            // rejected here instead of failing per-request.
            for rule in &policy.rules {
                if rule.name.is_empty() {
                    return Err(Error::validation(format!(
                        "policy '{}' has a rule with an empty name",
                        policy.name
                    )));
                }
                if let Some(conditions) = &rule.conditions {
                    let mut bad_pattern = None;
                    conditions.visit_patterns(&mut |pattern| {
                        if bad_pattern.is_none() {
                            if let Err(e) = self.patterns.get(pattern) {
                                bad_pattern = Some(format!("'{}': {}", pattern, e));
                            }
                        }
                    });
                    if let Some(detail) = bad_pattern {
                        return Err(Error::validation(format!(
                            "invalid pattern in policy '{}' rule '{}': {}",
                            policy.name, rule.name, detail
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Snapshot copy of the current policy list
    pub fn policies(&self) -> Vec<Arc<Policy>> {
        self.snapshot.load().policies.clone()
    }

    /// Version of the published snapshot
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.load().version
    }

    /// Stop the background watcher
    pub async fn close(&self) -> Result<()> {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn watch(
        engine: std::sync::Weak<Self>,
        mut events: broadcast::Receiver<PolicyEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(engine) = engine.upgrade() else { break };
                    debug!(kind = ?event.kind, "Policy source event, reloading");
                    if let Err(e) = engine.reload_policies().await {
                        warn!("Hot reload failed: {}", e);
                    }
                }
                // Missed events still mean the set changed; reload once
                Err(broadcast::error::RecvError::Lagged(_)) => {
                    let Some(engine) = engine.upgrade() else { break };
                    if let Err(e) = engine.reload_policies().await {
                        warn!("Hot reload failed: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn evaluate(&self, target: EvalTarget<'_>) -> Decision {
        let started = Instant::now();
        let mut ctx = EvaluationContext::new(
            target,
            self.config.policy_timeout(),
            self.config.enable_tracing,
        );

        let decision = match self.run_evaluation(&mut ctx) {
            Ok(()) => self.build_decision(ctx),
            Err(e) => self.fail_safe(e, ctx),
        };

        histogram!("jupiter_policy_evaluation_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        counter!(
            "jupiter_policy_evaluations_total",
            "decision" => decision_label(decision.action)
        )
        .increment(1);

        decision
    }

    fn run_evaluation(&self, ctx: &mut EvaluationContext<'_>) -> Result<()> {
        let snapshot = self.snapshot.load_full();

        'policies: for policy in &snapshot.policies {
            ctx.policy_name.clone_from(&policy.name);
            ctx.variables = policy.variables.clone();

            for rule in &policy.rules {
                if !rule.enabled {
                    continue;
                }
                ctx.rule_name.clone_from(&rule.name);
                ctx.deadline.begin_rule(self.config.rule_timeout());
                ctx.check_deadline()?;

                let rule_started = Instant::now();
                let matched = match &rule.conditions {
                    Some(conditions) => self.matcher.matches(conditions, ctx)?,
                    // A rule without conditions always applies
                    None => true,
                };

                if !matched {
                    ctx.record_trace(false, rule_started.elapsed(), None);
                    continue;
                }

                ctx.matched_rules.push(MatchedRule {
                    policy: policy.name.clone(),
                    rule: rule.name.clone(),
                });

                for action in &rule.actions {
                    ctx.check_deadline()?;
                    if let Err(e) = self.executor.execute(action, ctx) {
                        if action.action.is_blocking() {
                            ctx.record_trace(
                                true,
                                rule_started.elapsed(),
                                Some(e.to_string()),
                            );
                            return Err(e);
                        }
                        warn!(
                            policy = %policy.name,
                            rule = %rule.name,
                            action = %action.action.as_str(),
                            "Non-blocking action failed, continuing: {}",
                            e
                        );
                    }
                }

                ctx.record_trace(true, rule_started.elapsed(), None);

                if ctx.stopped {
                    break 'policies;
                }
            }
        }

        Ok(())
    }

    fn build_decision(&self, ctx: EvaluationContext<'_>) -> Decision {
        let action = if ctx.block_reason.is_some() {
            DecisionAction::Block
        } else if ctx.routing_target.is_some() {
            DecisionAction::Route
        } else if !ctx.transformations.is_empty() || !ctx.redactions.is_empty() {
            DecisionAction::Transform
        } else {
            DecisionAction::Allow
        };

        let block_status = ctx
            .block_reason
            .as_ref()
            .map(|_| ctx.block_status.unwrap_or(403));

        Decision {
            action,
            matched_rules: ctx.matched_rules,
            tags: ctx.tags,
            transformations: ctx.transformations,
            redactions: ctx.redactions,
            notifications: ctx.notifications,
            limit_directives: ctx.limit_directives,
            routing_target: ctx.routing_target,
            block_reason: ctx.block_reason,
            block_status,
            evaluation_time: ctx.deadline.elapsed(),
            trace: ctx.trace,
        }
    }

    /// Convert a bubbled evaluation error into a decision.
    ///
    /// Partial accumulations are discarded; the internal error text never
    /// reaches the client.
    fn fail_safe(&self, err: Error, ctx: EvaluationContext<'_>) -> Decision {
        error!(
            request_id = %ctx.target.request_id(),
            mode = ?self.config.fail_safe_mode,
            "Policy evaluation error: {}",
            err
        );
        counter!("jupiter_policy_failsafe_total").increment(1);

        let mut decision = match self.config.fail_safe_mode {
            FailSafeMode::FailOpen => Decision::allow(),
            FailSafeMode::FailClosed => {
                Decision::block(ENGINE_ERROR_REASON, ENGINE_ERROR_STATUS)
            }
            FailSafeMode::FailSafeDefault => match self.config.default_action {
                DecisionAction::Block => {
                    Decision::block(ENGINE_ERROR_REASON, ENGINE_ERROR_STATUS)
                }
                _ => Decision::allow(),
            },
        };
        decision.evaluation_time = ctx.deadline.elapsed();
        decision.trace = ctx.trace;
        decision
    }
}

fn decision_label(action: DecisionAction) -> &'static str {
    match action {
        DecisionAction::Allow => "allow",
        DecisionAction::Block => "block",
        DecisionAction::Transform => "transform",
        DecisionAction::Route => "route",
    }
}
