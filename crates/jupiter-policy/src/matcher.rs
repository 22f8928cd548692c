//! Condition matcher
//!
//! Evaluates a condition tree against the enriched object under
//! evaluation. Composite nodes short-circuit and observe the evaluation
//! deadline at every child boundary. Missing fields are converted through
//! the configured fail-safe mode at the leaf boundary: fail-open treats
//! the leaf as matched, fail-closed surfaces an error, fail-safe-default
//! treats it as not matched. Negation applies after that conversion.

use jupiter_core::{Error, Result, Value};
use std::sync::Arc;

use crate::condition::{ConditionNode, ConditionOperator};
use crate::config::{BusinessHoursConfig, EngineConfig, FailSafeMode};
use crate::context::EvaluationContext;
use crate::patterns::PatternCache;
use crate::{fields, functions};

/// Condition matcher
pub struct ConditionMatcher {
    patterns: Arc<PatternCache>,
    fail_safe: FailSafeMode,
    business_hours: BusinessHoursConfig,
}

impl ConditionMatcher {
    /// Create a matcher sharing the engine's pattern cache
    pub fn new(patterns: Arc<PatternCache>, config: &EngineConfig) -> Self {
        Self {
            patterns,
            fail_safe: config.fail_safe_mode,
            business_hours: config.business_hours.clone(),
        }
    }

    /// Evaluate a condition tree against the context's target
    pub fn matches(&self, node: &ConditionNode, ctx: &EvaluationContext<'_>) -> Result<bool> {
        match node {
            ConditionNode::Simple {
                field,
                operator,
                value,
            } => self.match_simple(field, *operator, value, ctx),

            ConditionNode::All { conditions } => {
                for child in conditions {
                    ctx.check_deadline()?;
                    if !self.matches(child, ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            ConditionNode::Any { conditions } => {
                for child in conditions {
                    ctx.check_deadline()?;
                    if self.matches(child, ctx)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            ConditionNode::Not { condition } => Ok(!self.matches(condition, ctx)?),

            ConditionNode::Function { function, args } => {
                functions::evaluate(function, args, &ctx.target, &self.business_hours).map_err(
                    |cause| Error::condition(&ctx.policy_name, &ctx.rule_name, function, cause),
                )
            }
        }
    }

    fn match_simple(
        &self,
        field: &str,
        operator: ConditionOperator,
        expected: &Value,
        ctx: &EvaluationContext<'_>,
    ) -> Result<bool> {
        let expected = expected.resolve(&ctx.variables).ok_or_else(|| {
            Error::condition(
                &ctx.policy_name,
                &ctx.rule_name,
                field,
                format!("unbound variable in expected value: {}", expected),
            )
        })?;

        let actual = match fields::resolve(&ctx.target, field) {
            Ok(value) => value,
            Err(err) if err.is_field_not_found() => {
                return match self.fail_safe {
                    FailSafeMode::FailOpen => Ok(true),
                    FailSafeMode::FailClosed => Err(Error::condition(
                        &ctx.policy_name,
                        &ctx.rule_name,
                        field,
                        err,
                    )),
                    FailSafeMode::FailSafeDefault => Ok(false),
                };
            }
            Err(err) => {
                return Err(Error::condition(&ctx.policy_name, &ctx.rule_name, field, err))
            }
        };

        self.apply_operator(operator, &actual, expected, field, ctx)
    }

    fn apply_operator(
        &self,
        operator: ConditionOperator,
        actual: &Value,
        expected: &Value,
        field: &str,
        ctx: &EvaluationContext<'_>,
    ) -> Result<bool> {
        let condition_err = |cause: String| {
            Error::condition(&ctx.policy_name, &ctx.rule_name, field, cause)
        };

        match operator {
            ConditionOperator::Eq => Ok(values_equal(actual, expected)),
            ConditionOperator::Ne => Ok(!values_equal(actual, expected)),

            ConditionOperator::Lt
            | ConditionOperator::Gt
            | ConditionOperator::Le
            | ConditionOperator::Ge => {
                let lhs = actual.as_f64().ok_or_else(|| {
                    condition_err(format!("expected number, got {}", actual.type_name()))
                })?;
                let rhs = expected.as_f64().ok_or_else(|| {
                    condition_err(format!(
                        "comparison value must be a number, got {}",
                        expected.type_name()
                    ))
                })?;
                Ok(match operator {
                    ConditionOperator::Lt => lhs < rhs,
                    ConditionOperator::Gt => lhs > rhs,
                    ConditionOperator::Le => lhs <= rhs,
                    ConditionOperator::Ge => lhs >= rhs,
                    _ => unreachable!(),
                })
            }

            ConditionOperator::Contains => match actual {
                Value::String(haystack) => {
                    let needle = expected.as_str().ok_or_else(|| {
                        condition_err(format!(
                            "contains on a string needs a string value, got {}",
                            expected.type_name()
                        ))
                    })?;
                    Ok(haystack.contains(needle))
                }
                Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, expected))),
                other => Err(condition_err(format!(
                    "contains needs a string or array, got {}",
                    other.type_name()
                ))),
            },

            ConditionOperator::Matches => {
                let haystack = actual.as_str().ok_or_else(|| {
                    condition_err(format!("matches needs a string, got {}", actual.type_name()))
                })?;
                let pattern = expected.as_str().ok_or_else(|| {
                    condition_err(format!(
                        "matches pattern must be a string, got {}",
                        expected.type_name()
                    ))
                })?;
                let regex = self
                    .patterns
                    .get(pattern)
                    .map_err(|e| condition_err(format!("invalid pattern '{}': {}", pattern, e)))?;
                Ok(regex.is_match(haystack))
            }

            ConditionOperator::StartsWith | ConditionOperator::EndsWith => {
                let haystack = actual.as_str().ok_or_else(|| {
                    condition_err(format!(
                        "{} needs a string, got {}",
                        operator.as_str(),
                        actual.type_name()
                    ))
                })?;
                let affix = expected.as_str().ok_or_else(|| {
                    condition_err(format!(
                        "{} value must be a string, got {}",
                        operator.as_str(),
                        expected.type_name()
                    ))
                })?;
                Ok(match operator {
                    ConditionOperator::StartsWith => haystack.starts_with(affix),
                    _ => haystack.ends_with(affix),
                })
            }

            ConditionOperator::In | ConditionOperator::NotIn => {
                let candidates = expected.as_array().ok_or_else(|| {
                    condition_err(format!(
                        "{} needs an array value, got {}",
                        operator.as_str(),
                        expected.type_name()
                    ))
                })?;
                let found = candidates.iter().any(|item| values_equal(actual, item));
                Ok(match operator {
                    ConditionOperator::In => found,
                    _ => !found,
                })
            }
        }
    }
}

/// Equality with numeric cross-type tolerance.
///
/// Numbers share one representation, so int/float equality is a plain
/// comparison; everything else compares structurally.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EvalTarget;
    use jupiter_core::value::VariableMap;
    use jupiter_core::{EnrichedRequest, OriginalRequest};
    use std::time::Duration;

    fn matcher_with(fail_safe: FailSafeMode) -> ConditionMatcher {
        let config = EngineConfig {
            fail_safe_mode: fail_safe,
            ..EngineConfig::default()
        };
        ConditionMatcher::new(Arc::new(PatternCache::new()), &config)
    }

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

    fn simple(field: &str, operator: ConditionOperator, value: Value) -> ConditionNode {
        ConditionNode::Simple {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_equality_on_model() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple("request.model", ConditionOperator::Eq, Value::from("gpt-4"));
        assert!(matcher.matches(&node, &ctx).unwrap());

        let node = simple("request.model", ConditionOperator::Ne, Value::from("gpt-4"));
        assert!(!matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_numeric_comparison() {
        let mut request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        request.risk_score = 0.8;
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple("request.risk_score", ConditionOperator::Gt, Value::from(0.5));
        assert!(matcher.matches(&node, &ctx).unwrap());

        let node = simple("request.risk_score", ConditionOperator::Le, Value::from(0.5));
        assert!(!matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_non_numeric_actual_is_error() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple("request.model", ConditionOperator::Lt, Value::from(10.0));
        assert!(matcher.matches(&node, &ctx).is_err());
    }

    #[test]
    fn test_starts_with_prefix() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("claude-3-sonnet"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple(
            "request.model",
            ConditionOperator::StartsWith,
            Value::from("claude"),
        );
        assert!(matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_regex_matches() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4-turbo"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple(
            "request.model",
            ConditionOperator::Matches,
            Value::from("^gpt-4(-turbo)?$"),
        );
        assert!(matcher.matches(&node, &ctx).unwrap());

        let node = simple(
            "request.model",
            ConditionOperator::Matches,
            Value::from("([bad"),
        );
        assert!(matcher.matches(&node, &ctx).is_err());
    }

    #[test]
    fn test_in_membership() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let models = Value::Array(vec![Value::from("gpt-4"), Value::from("o1-preview")]);
        let node = simple("request.model", ConditionOperator::In, models.clone());
        assert!(matcher.matches(&node, &ctx).unwrap());

        let node = simple("request.model", ConditionOperator::NotIn, models);
        assert!(!matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_variable_reference_in_expected() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let mut ctx = ctx_for(&request);
        let mut vars = VariableMap::new();
        vars.insert(
            "blocked".to_string(),
            Value::Array(vec![Value::from("gpt-4")]),
        );
        ctx.variables = vars;
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple(
            "request.model",
            ConditionOperator::In,
            Value::Var("blocked".to_string()),
        );
        assert!(matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_missing_field_fail_safe_modes() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let ctx = ctx_for(&request);
        let node = simple("request.max_tokens", ConditionOperator::Gt, Value::from(10.0));

        assert!(matcher_with(FailSafeMode::FailOpen)
            .matches(&node, &ctx)
            .unwrap());
        assert!(!matcher_with(FailSafeMode::FailSafeDefault)
            .matches(&node, &ctx)
            .unwrap());
        assert!(matcher_with(FailSafeMode::FailClosed)
            .matches(&node, &ctx)
            .is_err());
    }

    #[test]
    fn test_all_short_circuits() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = ConditionNode::All {
            conditions: vec![
                simple("request.model", ConditionOperator::Eq, Value::from("other")),
                // Would error, but the first child already failed
                simple("request.model", ConditionOperator::Lt, Value::from(1.0)),
            ],
        };
        assert!(!matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_any_and_not_composition() {
        let request = EnrichedRequest::new("r", OriginalRequest::new("claude-3-opus"));
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = ConditionNode::Any {
            conditions: vec![
                simple("request.model", ConditionOperator::Eq, Value::from("gpt-4")),
                ConditionNode::Not {
                    condition: Box::new(simple(
                        "request.model",
                        ConditionOperator::StartsWith,
                        Value::from("gpt"),
                    )),
                },
            ],
        };
        assert!(matcher.matches(&node, &ctx).unwrap());
    }

    #[test]
    fn test_contains_on_string_and_array() {
        let mut request = EnrichedRequest::new("r", OriginalRequest::new("gpt-4"));
        request.content_analysis.pii_detection.detected_types =
            vec!["email".to_string(), "phone".to_string()];
        let ctx = ctx_for(&request);
        let matcher = matcher_with(FailSafeMode::FailOpen);

        let node = simple(
            "request.model",
            ConditionOperator::Contains,
            Value::from("pt-"),
        );
        assert!(matcher.matches(&node, &ctx).unwrap());

        let node = simple(
            "request.content_analysis.pii_detection.detected_types",
            ConditionOperator::Contains,
            Value::from("email"),
        );
        assert!(matcher.matches(&node, &ctx).unwrap());
    }
}
