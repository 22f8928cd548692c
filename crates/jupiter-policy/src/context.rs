//! Evaluation context and decision types
//!
//! The context is the single-evaluation accumulator every action mutates;
//! the decision is the immutable synthesis handed back to the caller.

use jupiter_core::value::{Value, VariableMap};
use jupiter_core::{EnrichedRequest, EnrichedResponse, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::redaction::RedactionStrategy;

/// The object under evaluation
#[derive(Debug, Clone, Copy)]
pub enum EvalTarget<'a> {
    /// Pre-request evaluation
    Request(&'a EnrichedRequest),
    /// Post-response evaluation
    Response(&'a EnrichedResponse),
}

impl<'a> EvalTarget<'a> {
    /// Request id of the underlying object
    pub fn request_id(&self) -> &str {
        match self {
            EvalTarget::Request(r) => &r.request_id,
            EvalTarget::Response(r) => &r.request_id,
        }
    }

    /// Content analysis bundle of the underlying object
    pub fn content_analysis(&self) -> &jupiter_core::request::ContentAnalysis {
        match self {
            EvalTarget::Request(r) => &r.content_analysis,
            EvalTarget::Response(r) => &r.content_analysis,
        }
    }
}

/// Layered cooperative deadline for one evaluation
///
/// The rule deadline is re-derived per rule and never extends past the
/// policy deadline. The matcher checks it at composite-child boundaries
/// and the executor between actions.
#[derive(Debug, Clone, Copy)]
pub struct EvalDeadline {
    started: Instant,
    policy_deadline: Instant,
    rule_deadline: Instant,
}

impl EvalDeadline {
    /// Start a deadline clock for one evaluation
    pub fn new(policy_timeout: Duration) -> Self {
        let started = Instant::now();
        let policy_deadline = started + policy_timeout;
        Self {
            started,
            policy_deadline,
            rule_deadline: policy_deadline,
        }
    }

    /// Begin a rule: the rule deadline is `min(policy deadline, now + rule
    /// timeout)`
    pub fn begin_rule(&mut self, rule_timeout: Duration) {
        self.rule_deadline = (Instant::now() + rule_timeout).min(self.policy_deadline);
    }

    /// Elapsed time since the evaluation started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Error out if the active rule deadline has expired
    pub fn check(&self, policy: &str, rule: &str) -> Result<()> {
        if Instant::now() >= self.rule_deadline {
            Err(Error::Timeout {
                policy: policy.to_string(),
                rule: rule.to_string(),
                elapsed: self.elapsed(),
            })
        } else {
            Ok(())
        }
    }
}

/// A rule whose conditions matched during the evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    /// Policy the rule belongs to
    pub policy: String,

    /// Rule name
    pub rule: String,
}

/// A queued request/response field transformation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transformation {
    /// Field to transform
    pub field: String,

    /// Operation to apply (set, append, remove, ...)
    pub operation: String,

    /// Operation operand
    pub value: Value,
}

/// A queued content redaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionDirective {
    /// Field to redact
    pub field: String,

    /// Redaction strategy
    pub strategy: RedactionStrategy,

    /// Optional pattern selecting what to redact; absent means the whole
    /// field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Replacement text; strategies fall back to their own defaults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

/// A queued asynchronous notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Notification channel kind (webhook, email, ...)
    pub kind: String,

    /// Delivery destination
    pub destination: String,

    /// Message payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Dispatch happens off the evaluation path
    pub async_dispatch: bool,
}

/// Routing override produced by a `route` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTarget {
    /// Target provider
    pub provider: String,

    /// Target model, if overridden
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Fallback providers in preference order
    #[serde(default)]
    pub fallback: Vec<String>,
}

/// Parameters recorded by the placeholder `rate_limit`/`budget` actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitDirective {
    /// Which placeholder action recorded this (rate_limit or budget)
    pub kind: String,

    /// Raw action parameters
    pub params: BTreeMap<String, Value>,
}

/// Per-rule trace entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Policy evaluated
    pub policy: String,

    /// Rule evaluated
    pub rule: String,

    /// Whether the conditions matched
    pub matched: bool,

    /// Time spent on this rule
    pub duration: Duration,

    /// Additional detail (action failures, skip reasons)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Optional recorder describing the path one evaluation took
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTrace {
    /// Trace identifier
    pub id: String,

    /// Entries in evaluation order
    pub entries: Vec<TraceEntry>,
}

impl EvaluationTrace {
    /// Create an empty trace with a fresh id
    pub fn new() -> Self {
        Self {
            id: format!("trace_{}", uuid::Uuid::new_v4()),
            entries: Vec::new(),
        }
    }
}

impl Default for EvaluationTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Mutable accumulator for one policy evaluation
pub struct EvaluationContext<'a> {
    /// Object under evaluation
    pub target: EvalTarget<'a>,

    /// Variables of the policy currently being evaluated
    pub variables: VariableMap,

    /// Policy currently being evaluated, for error attribution
    pub policy_name: String,

    /// Rule currently being evaluated, for error attribution
    pub rule_name: String,

    /// Rules whose conditions matched so far
    pub matched_rules: Vec<MatchedRule>,

    /// Accumulated tags
    pub tags: BTreeMap<String, String>,

    /// Accumulated transformations
    pub transformations: Vec<Transformation>,

    /// Accumulated redaction directives
    pub redactions: Vec<RedactionDirective>,

    /// Accumulated notifications
    pub notifications: Vec<Notification>,

    /// Accumulated placeholder limit directives
    pub limit_directives: Vec<LimitDirective>,

    /// Routing override, if any rule set one
    pub routing_target: Option<RoutingTarget>,

    /// Block reason, if any rule denied
    pub block_reason: Option<String>,

    /// Block status code, if any rule denied
    pub block_status: Option<u16>,

    /// Set by `allow`/`deny`; terminates iteration of all remaining
    /// policies
    pub stopped: bool,

    /// Optional trace recorder
    pub trace: Option<EvaluationTrace>,

    /// Layered deadline clock
    pub deadline: EvalDeadline,
}

impl<'a> EvaluationContext<'a> {
    /// Create a context for one evaluation
    pub fn new(target: EvalTarget<'a>, policy_timeout: Duration, with_trace: bool) -> Self {
        Self {
            target,
            variables: VariableMap::new(),
            policy_name: String::new(),
            rule_name: String::new(),
            matched_rules: Vec::new(),
            tags: BTreeMap::new(),
            transformations: Vec::new(),
            redactions: Vec::new(),
            notifications: Vec::new(),
            limit_directives: Vec::new(),
            routing_target: None,
            block_reason: None,
            block_status: None,
            stopped: false,
            trace: with_trace.then(EvaluationTrace::new),
            deadline: EvalDeadline::new(policy_timeout),
        }
    }

    /// Deadline check attributed to the active policy/rule
    pub fn check_deadline(&self) -> Result<()> {
        self.deadline.check(&self.policy_name, &self.rule_name)
    }

    /// Record a trace entry if tracing is enabled
    pub fn record_trace(&mut self, matched: bool, duration: Duration, detail: Option<String>) {
        let policy = self.policy_name.clone();
        let rule = self.rule_name.clone();
        if let Some(trace) = &mut self.trace {
            trace.entries.push(TraceEntry {
                policy,
                rule,
                matched,
                duration,
                detail,
            });
        }
    }
}

/// Final synthesized action of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    /// Forward the request unchanged
    Allow,
    /// Reject the request with the accumulated reason/status
    Block,
    /// Forward after applying accumulated transformations/redactions
    Transform,
    /// Forward to the accumulated routing target
    Route,
}

/// The single composite decision produced by one evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Final action
    pub action: DecisionAction,

    /// Rules whose conditions matched
    pub matched_rules: Vec<MatchedRule>,

    /// Accumulated tags
    pub tags: BTreeMap<String, String>,

    /// Accumulated transformations
    pub transformations: Vec<Transformation>,

    /// Accumulated redaction directives
    pub redactions: Vec<RedactionDirective>,

    /// Accumulated notifications
    pub notifications: Vec<Notification>,

    /// Accumulated placeholder limit directives
    pub limit_directives: Vec<LimitDirective>,

    /// Routing override for `action == route`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_target: Option<RoutingTarget>,

    /// Block reason for `action == block`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,

    /// Block status code for `action == block`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_status: Option<u16>,

    /// Total evaluation time
    pub evaluation_time: Duration,

    /// Trace, when tracing is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<EvaluationTrace>,
}

impl Decision {
    /// An allow decision with no accumulated effects
    pub fn allow() -> Self {
        Self {
            action: DecisionAction::Allow,
            matched_rules: Vec::new(),
            tags: BTreeMap::new(),
            transformations: Vec::new(),
            redactions: Vec::new(),
            notifications: Vec::new(),
            limit_directives: Vec::new(),
            routing_target: None,
            block_reason: None,
            block_status: None,
            evaluation_time: Duration::ZERO,
            trace: None,
        }
    }

    /// A block decision with the given reason and status
    pub fn block(reason: impl Into<String>, status: u16) -> Self {
        let mut decision = Self::allow();
        decision.action = DecisionAction::Block;
        decision.block_reason = Some(reason.into());
        decision.block_status = Some(status);
        decision
    }

    /// Whether this decision blocks the request
    pub fn is_blocked(&self) -> bool {
        self.action == DecisionAction::Block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jupiter_core::OriginalRequest;

    #[test]
    fn test_deadline_begin_rule_clamped_to_policy() {
        let mut deadline = EvalDeadline::new(Duration::from_millis(10));
        deadline.begin_rule(Duration::from_secs(60));
        // Rule deadline cannot extend past the policy deadline
        assert!(deadline.rule_deadline <= deadline.policy_deadline);
    }

    #[test]
    fn test_deadline_expiry_is_timeout_error() {
        let request = EnrichedRequest::new("req-1", OriginalRequest::new("gpt-4"));
        let mut ctx = EvaluationContext::new(
            EvalTarget::Request(&request),
            Duration::ZERO,
            false,
        );
        ctx.policy_name = "p".to_string();
        ctx.rule_name = "r".to_string();

        let err = ctx.check_deadline().unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_trace_recording() {
        let request = EnrichedRequest::new("req-1", OriginalRequest::new("gpt-4"));
        let mut ctx = EvaluationContext::new(
            EvalTarget::Request(&request),
            Duration::from_secs(1),
            true,
        );
        ctx.policy_name = "p".to_string();
        ctx.rule_name = "r".to_string();
        ctx.record_trace(true, Duration::from_micros(12), None);

        let trace = ctx.trace.as_ref().unwrap();
        assert_eq!(trace.entries.len(), 1);
        assert!(trace.entries[0].matched);
    }

    #[test]
    fn test_block_decision() {
        let decision = Decision::block("GPT-4 blocked", 403);
        assert!(decision.is_blocked());
        assert_eq!(decision.block_status, Some(403));
    }
}
