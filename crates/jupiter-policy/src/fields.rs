//! Field extraction
//!
//! Conditions reference fields by dot path. The first segment selects the
//! root (`request`, `response`, or `metadata`); the remainder is resolved
//! through an explicit dispatch table. Unknown paths and nil intermediate
//! values resolve to a deterministic field-not-found error. Matching is
//! case-insensitive.
//!
//! Supported request paths:
//! `request.{request_id,model,model_family,pricing_tier,tokens,
//! prompt_tokens,estimated_cost,estimated_latency_ms,complexity_score,
//! risk_score,temperature,max_tokens,stream,user}`,
//! `request.token_estimate.{prompt_tokens,completion_tokens,total_tokens}`,
//! `request.cost_estimate.{prompt,completion,total}`,
//! `request.content_analysis.pii_detection.{has_pii,score,detected_types}`,
//! `request.content_analysis.prompt_injection.{has_prompt_injection,score}`,
//! `request.conversation_context.{conversation_id,turn_count,total_tokens}`.
//!
//! Supported response paths:
//! `response.{request_id,model,content,tokens,prompt_tokens,
//! completion_tokens,actual_cost,finish_reason,truncated,filtered}`,
//! `response.usage.{prompt_tokens,completion_tokens,total_tokens}`,
//! `response.latency.{total_ms,upstream_ms,gateway_ms}`,
//! `response.quality.{score,refusal_score}`,
//! `response.content_analysis.*` (same shape as the request).
//!
//! `metadata.<key>` resolves against the free-form metadata map of the
//! object under evaluation.

use jupiter_core::{EnrichedRequest, EnrichedResponse, Error, Result, Value};

use crate::context::EvalTarget;

/// Resolve a dot-path field reference against the evaluation target
pub fn resolve(target: &EvalTarget<'_>, path: &str) -> Result<Value> {
    let lowered = path.to_ascii_lowercase();
    let (root, rest) = match lowered.split_once('.') {
        Some(parts) => parts,
        None => (lowered.as_str(), ""),
    };

    match (root, target) {
        ("request", EvalTarget::Request(request)) => resolve_request(request, rest, path),
        ("response", EvalTarget::Response(response)) => resolve_response(response, rest, path),
        ("metadata", EvalTarget::Request(request)) => {
            lookup_metadata(&request.metadata, rest, path)
        }
        ("metadata", EvalTarget::Response(response)) => {
            lookup_metadata(&response.metadata, rest, path)
        }
        // Root exists but does not apply to this evaluation phase
        ("request", EvalTarget::Response(_)) | ("response", EvalTarget::Request(_)) => {
            Err(Error::field_not_found(path))
        }
        _ => Err(Error::field_not_found(path)),
    }
}

fn resolve_request(request: &EnrichedRequest, rest: &str, path: &str) -> Result<Value> {
    let value = match rest {
        "request_id" => Value::from(request.request_id.as_str()),
        "model" => Value::from(request.original.model.as_str()),
        "model_family" => Value::from(request.model_family.as_str()),
        "pricing_tier" => Value::from(request.pricing_tier.as_str()),
        "estimated_latency_ms" => Value::from(request.estimated_latency_ms),
        "complexity_score" => Value::from(request.complexity_score),
        "risk_score" => Value::from(request.risk_score),
        "stream" => Value::from(request.original.stream),

        // Top-level shorthands for the estimate bundles
        "tokens" => Value::from(request.token_estimate.total_tokens),
        "prompt_tokens" => Value::from(request.token_estimate.prompt_tokens),
        "estimated_cost" => Value::from(request.cost_estimate.total),

        // Optional client parameters; absent surfaces as field-not-found
        "temperature" => match request.original.temperature {
            Some(t) => Value::from(t),
            None => return Err(Error::field_not_found(path)),
        },
        "max_tokens" => match request.original.max_tokens {
            Some(m) => Value::from(m),
            None => return Err(Error::field_not_found(path)),
        },
        "user" => match &request.original.user {
            Some(u) => Value::from(u.as_str()),
            None => return Err(Error::field_not_found(path)),
        },

        "token_estimate.prompt_tokens" => Value::from(request.token_estimate.prompt_tokens),
        "token_estimate.completion_tokens" => {
            Value::from(request.token_estimate.completion_tokens)
        }
        "token_estimate.total_tokens" => Value::from(request.token_estimate.total_tokens),

        "cost_estimate.prompt" => Value::from(request.cost_estimate.prompt),
        "cost_estimate.completion" => Value::from(request.cost_estimate.completion),
        "cost_estimate.total" => Value::from(request.cost_estimate.total),

        "conversation_context.turn_count" => {
            Value::from(request.conversation_context.turn_count)
        }
        "conversation_context.total_tokens" => {
            Value::from(request.conversation_context.total_tokens)
        }
        "conversation_context.conversation_id" => {
            match &request.conversation_context.conversation_id {
                Some(id) => Value::from(id.as_str()),
                None => return Err(Error::field_not_found(path)),
            }
        }

        _ => return resolve_content_analysis(&request.content_analysis, rest, path),
    };
    Ok(value)
}

fn resolve_response(response: &EnrichedResponse, rest: &str, path: &str) -> Result<Value> {
    let value = match rest {
        "request_id" => Value::from(response.request_id.as_str()),
        "model" => Value::from(response.model.as_str()),
        "content" => Value::from(response.content.as_str()),
        "actual_cost" => Value::from(response.actual_cost),

        "tokens" => Value::from(response.usage.total_tokens),
        "prompt_tokens" => Value::from(response.usage.prompt_tokens),
        "completion_tokens" => Value::from(response.usage.completion_tokens),

        "usage.prompt_tokens" => Value::from(response.usage.prompt_tokens),
        "usage.completion_tokens" => Value::from(response.usage.completion_tokens),
        "usage.total_tokens" => Value::from(response.usage.total_tokens),

        "finish_reason" => Value::from(response.finish.reason.as_str()),
        "truncated" => Value::from(response.finish.truncated),
        "filtered" => Value::from(response.finish.filtered),

        "latency.total_ms" => Value::from(response.latency.total_ms),
        "latency.upstream_ms" => Value::from(response.latency.upstream_ms),
        "latency.gateway_ms" => Value::from(response.latency.gateway_ms),

        "quality.score" => Value::from(response.quality.score),
        "quality.refusal_score" => Value::from(response.quality.refusal_score),

        _ => return resolve_content_analysis(&response.content_analysis, rest, path),
    };
    Ok(value)
}

fn resolve_content_analysis(
    analysis: &jupiter_core::request::ContentAnalysis,
    rest: &str,
    path: &str,
) -> Result<Value> {
    let value = match rest {
        "content_analysis.pii_detection.has_pii" => Value::from(analysis.pii_detection.has_pii),
        "content_analysis.pii_detection.score" => Value::from(analysis.pii_detection.score),
        "content_analysis.pii_detection.detected_types" => Value::Array(
            analysis
                .pii_detection
                .detected_types
                .iter()
                .map(|t| Value::from(t.as_str()))
                .collect(),
        ),
        "content_analysis.prompt_injection.has_prompt_injection" => {
            Value::from(analysis.prompt_injection.has_prompt_injection)
        }
        "content_analysis.prompt_injection.score" => {
            Value::from(analysis.prompt_injection.score)
        }
        _ => return Err(Error::field_not_found(path)),
    };
    Ok(value)
}

fn lookup_metadata(
    metadata: &std::collections::BTreeMap<String, Value>,
    key: &str,
    path: &str,
) -> Result<Value> {
    metadata
        .get(key)
        .cloned()
        .ok_or_else(|| Error::field_not_found(path))
}
