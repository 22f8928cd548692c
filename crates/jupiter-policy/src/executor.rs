//! Action executor
//!
//! Executes a single action against the evaluation context. Actions only
//! accumulate effects; nothing here touches the wire. The engine decides
//! what a failure means: blocking action types halt the policy,
//! non-blocking failures are logged and evaluation continues.

use jupiter_core::{Error, Result, Value};
use tracing::{debug, error, info, warn};

use crate::action::{Action, ActionType};
use crate::context::{
    EvaluationContext, LimitDirective, Notification, RedactionDirective, RoutingTarget,
    Transformation,
};
use crate::fields;
use crate::redaction::RedactionStrategy;

const DEFAULT_BLOCK_STATUS: u16 = 403;
const DEFAULT_BLOCK_MESSAGE: &str = "Request blocked by policy";

/// Action executor
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    /// Create a new action executor
    pub fn new() -> Self {
        Self
    }

    /// Execute one action, mutating the context
    pub fn execute(&self, action: &Action, ctx: &mut EvaluationContext<'_>) -> Result<()> {
        match action.action {
            ActionType::Allow => {
                ctx.stopped = true;
                debug!(
                    policy = %ctx.policy_name,
                    rule = %ctx.rule_name,
                    "Explicit allow, stopping evaluation"
                );
                Ok(())
            }

            ActionType::Deny => {
                let message = action
                    .param_str("message", &ctx.variables)
                    .unwrap_or(DEFAULT_BLOCK_MESSAGE)
                    .to_string();
                let status = action
                    .param_f64("status_code", &ctx.variables)
                    .map(|s| s as u16)
                    .unwrap_or(DEFAULT_BLOCK_STATUS);

                warn!(
                    policy = %ctx.policy_name,
                    rule = %ctx.rule_name,
                    status = %status,
                    "Blocking request"
                );

                ctx.block_reason = Some(message);
                ctx.block_status = Some(status);
                ctx.stopped = true;
                Ok(())
            }

            ActionType::Log => {
                let message = action
                    .param_str("message", &ctx.variables)
                    .unwrap_or("")
                    .to_string();
                let level = action.param_str("level", &ctx.variables).unwrap_or("info");
                match level {
                    "debug" => debug!(policy = %ctx.policy_name, rule = %ctx.rule_name, "{}", message),
                    "warn" => warn!(policy = %ctx.policy_name, rule = %ctx.rule_name, "{}", message),
                    "error" => error!(policy = %ctx.policy_name, rule = %ctx.rule_name, "{}", message),
                    _ => info!(policy = %ctx.policy_name, rule = %ctx.rule_name, "{}", message),
                }
                Ok(())
            }

            ActionType::Redact => {
                let field = action
                    .param_str("field", &ctx.variables)
                    .unwrap_or("prompt")
                    .to_string();
                let strategy = match action.param_str("strategy", &ctx.variables) {
                    None => RedactionStrategy::Mask,
                    Some(name) => RedactionStrategy::parse(name).ok_or_else(|| {
                        self.action_err(action, ctx, format!("unknown strategy '{}'", name))
                    })?,
                };

                ctx.redactions.push(RedactionDirective {
                    field: field.clone(),
                    strategy,
                    pattern: action
                        .param_str("pattern", &ctx.variables)
                        .map(String::from),
                    replacement: action
                        .param_str("replacement", &ctx.variables)
                        .map(String::from),
                });

                debug!(
                    policy = %ctx.policy_name,
                    rule = %ctx.rule_name,
                    field = %field,
                    "Queued redaction"
                );
                Ok(())
            }

            ActionType::Modify => {
                let field = action
                    .param_str("field", &ctx.variables)
                    .ok_or_else(|| self.action_err(action, ctx, "missing 'field' parameter"))?
                    .to_string();
                let operation = action
                    .param_str("operation", &ctx.variables)
                    .unwrap_or("set")
                    .to_string();
                let value = action
                    .param("value", &ctx.variables)
                    .cloned()
                    .unwrap_or(Value::Null);

                debug!(
                    policy = %ctx.policy_name,
                    rule = %ctx.rule_name,
                    field = %field,
                    operation = %operation,
                    "Queued transformation"
                );

                ctx.transformations.push(Transformation {
                    field,
                    operation,
                    value,
                });
                Ok(())
            }

            ActionType::Route => {
                let provider = action
                    .param_str("provider", &ctx.variables)
                    .ok_or_else(|| self.action_err(action, ctx, "missing 'provider' parameter"))?
                    .to_string();
                let model = action
                    .param_str("model", &ctx.variables)
                    .map(String::from);
                let fallback = action
                    .param("fallback", &ctx.variables)
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();

                info!(
                    policy = %ctx.policy_name,
                    rule = %ctx.rule_name,
                    provider = %provider,
                    "Routing override"
                );

                ctx.routing_target = Some(RoutingTarget {
                    provider,
                    model,
                    fallback,
                });
                Ok(())
            }

            ActionType::Alert => {
                let destination = action
                    .param_str("destination", &ctx.variables)
                    .ok_or_else(|| {
                        self.action_err(action, ctx, "missing 'destination' parameter")
                    })?
                    .to_string();
                let kind = action
                    .param_str("type", &ctx.variables)
                    .unwrap_or("webhook")
                    .to_string();

                ctx.notifications.push(Notification {
                    kind,
                    destination,
                    message: action
                        .param_str("message", &ctx.variables)
                        .map(String::from),
                    async_dispatch: true,
                });
                Ok(())
            }

            ActionType::Tag => {
                let key = action
                    .param_str("key", &ctx.variables)
                    .ok_or_else(|| self.action_err(action, ctx, "missing 'key' parameter"))?
                    .to_string();

                let value = if let Some(v) = action.param("value", &ctx.variables) {
                    v.to_string()
                } else if let Some(path) = action.param_str("value_from", &ctx.variables) {
                    let path = path.to_string();
                    fields::resolve(&ctx.target, &path)
                        .map_err(|e| self.action_err(action, ctx, e))?
                        .to_string()
                } else {
                    "true".to_string()
                };

                ctx.tags.insert(key, value);
                Ok(())
            }

            ActionType::RateLimit | ActionType::Budget => {
                // Placeholder action: enforcement of configured limits
                // lives in the limits manager.
                ctx.limit_directives.push(LimitDirective {
                    kind: action.action.as_str().to_string(),
                    params: action.params.clone(),
                });
                debug!(
                    policy = %ctx.policy_name,
                    rule = %ctx.rule_name,
                    kind = %action.action.as_str(),
                    "Recorded limit directive"
                );
                Ok(())
            }
        }
    }

    fn action_err(
        &self,
        action: &Action,
        ctx: &EvaluationContext<'_>,
        cause: impl ToString,
    ) -> Error {
        Error::action(
            &ctx.policy_name,
            &ctx.rule_name,
            action.action.as_str(),
            cause,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvalTarget;
    use jupiter_core::{EnrichedRequest, OriginalRequest};
    use std::time::Duration;

    fn ctx_for<'a>(request: &'a EnrichedRequest) -> EvaluationContext<'a> {
        let mut ctx = EvaluationContext::new(
            EvalTarget::Request(request),
            Duration::from_secs(5),
            false,
        );
        ctx.policy_name = "test-policy".to_string();
        ctx.rule_name = "test-rule".to_string();
        ctx
    }

    #[test]
    fn test_allow_sets_stopped() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        ActionExecutor::new()
            .execute(&Action::new(ActionType::Allow), &mut ctx)
            .unwrap();
        assert!(ctx.stopped);
        assert!(ctx.block_reason.is_none());
    }

    #[test]
    fn test_deny_defaults() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        ActionExecutor::new()
            .execute(&Action::new(ActionType::Deny), &mut ctx)
            .unwrap();
        assert!(ctx.stopped);
        assert_eq!(ctx.block_status, Some(403));
        assert_eq!(ctx.block_reason.as_deref(), Some(DEFAULT_BLOCK_MESSAGE));
    }

    #[test]
    fn test_deny_with_parameters() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        let action = Action::new(ActionType::Deny)
            .with_param("message", "GPT-4 blocked")
            .with_param("status_code", 451i64);
        ActionExecutor::new().execute(&action, &mut ctx).unwrap();
        assert_eq!(ctx.block_reason.as_deref(), Some("GPT-4 blocked"));
        assert_eq!(ctx.block_status, Some(451));
    }

    #[test]
    fn test_redact_defaults() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        ActionExecutor::new()
            .execute(&Action::new(ActionType::Redact), &mut ctx)
            .unwrap();
        assert_eq!(ctx.redactions.len(), 1);
        assert_eq!(ctx.redactions[0].field, "prompt");
        assert_eq!(ctx.redactions[0].strategy, RedactionStrategy::Mask);
    }

    #[test]
    fn test_modify_requires_field() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        let err = ActionExecutor::new()
            .execute(&Action::new(ActionType::Modify), &mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("field"));
    }

    #[test]
    fn test_route_sets_target() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("claude-3-sonnet"));
        let mut ctx = ctx_for(&request);
        let action = Action::new(ActionType::Route)
            .with_param("provider", "anthropic")
            .with_param("model", "claude-3-haiku");
        ActionExecutor::new().execute(&action, &mut ctx).unwrap();

        let target = ctx.routing_target.unwrap();
        assert_eq!(target.provider, "anthropic");
        assert_eq!(target.model.as_deref(), Some("claude-3-haiku"));
    }

    #[test]
    fn test_tag_value_from_field() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        let action = Action::new(ActionType::Tag)
            .with_param("key", "model")
            .with_param("value_from", "request.model");
        ActionExecutor::new().execute(&action, &mut ctx).unwrap();
        assert_eq!(ctx.tags.get("model").map(String::as_str), Some("gpt-4"));
    }

    #[test]
    fn test_tag_defaults_to_true() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        let action = Action::new(ActionType::Tag).with_param("key", "governed");
        ActionExecutor::new().execute(&action, &mut ctx).unwrap();
        assert_eq!(ctx.tags.get("governed").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_alert_requires_destination() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        assert!(ActionExecutor::new()
            .execute(&Action::new(ActionType::Alert), &mut ctx)
            .is_err());

        let action = Action::new(ActionType::Alert)
            .with_param("destination", "https://hooks.example.com/governance");
        ActionExecutor::new().execute(&action, &mut ctx).unwrap();
        assert_eq!(ctx.notifications.len(), 1);
        assert_eq!(ctx.notifications[0].kind, "webhook");
        assert!(ctx.notifications[0].async_dispatch);
    }

    #[test]
    fn test_rate_limit_placeholder_records_params() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        let action = Action::new(ActionType::RateLimit)
            .with_param("limit", 100i64)
            .with_param("window", "minute");
        ActionExecutor::new().execute(&action, &mut ctx).unwrap();
        assert_eq!(ctx.limit_directives.len(), 1);
        assert_eq!(ctx.limit_directives[0].kind, "rate_limit");
    }
}
