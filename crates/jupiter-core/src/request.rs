//! Enriched request and response wrappers
//!
//! The enrichment pipeline runs before the decision engine and attaches
//! pre-computed metadata (token and cost estimates, content analysis,
//! conversation context) to the client request. The engine only reads
//! these wrappers; it never re-derives any of the analysis.

use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A chat message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant)
    pub role: String,

    /// Content of the message
    pub content: String,

    /// Optional name of the sender
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    /// Create a new chat message
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }
}

/// The client request as received, before enrichment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalRequest {
    /// Requested model identifier
    pub model: String,

    /// Conversation messages
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature, if the client set one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Completion token cap, if the client set one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// Whether the client requested a streaming response
    #[serde(default)]
    pub stream: bool,

    /// End-user identifier forwarded by the client application
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl OriginalRequest {
    /// Create a request for a model with no messages yet
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            temperature: None,
            max_tokens: None,
            stream: false,
            user: None,
        }
    }

    /// Concatenated content of all messages, used as the redaction target
    /// when a policy redacts the "prompt" field
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pre-computed token estimate for a request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenEstimate {
    /// Estimated prompt tokens
    pub prompt_tokens: u64,

    /// Estimated completion tokens (from max_tokens or a model heuristic)
    pub completion_tokens: u64,

    /// Estimated total tokens
    pub total_tokens: u64,
}

/// Pre-computed cost estimate, from configured per-1000-token rates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Estimated prompt cost
    pub prompt: f64,

    /// Estimated completion cost
    pub completion: f64,

    /// Estimated total cost
    pub total: f64,
}

/// PII detection output from the content-analysis collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PiiDetection {
    /// Whether any PII was detected
    pub has_pii: bool,

    /// Detected PII categories (email, phone, ssn, ...)
    #[serde(default)]
    pub detected_types: Vec<String>,

    /// Detection confidence (0.0-1.0)
    #[serde(default)]
    pub score: f64,
}

/// Prompt-injection detection output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionDetection {
    /// Whether a prompt injection attempt was detected
    pub has_prompt_injection: bool,

    /// Detection confidence (0.0-1.0)
    #[serde(default)]
    pub score: f64,
}

/// Bundle of content-analysis outputs the engine consumes as booleans/scores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentAnalysis {
    /// PII detection results
    #[serde(default)]
    pub pii_detection: PiiDetection,

    /// Prompt-injection detection results
    #[serde(default)]
    pub prompt_injection: InjectionDetection,
}

/// Rolling conversation context attached by the enrichment pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// Conversation identifier, if the client maintains one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Number of turns so far, including this one
    pub turn_count: u64,

    /// Cumulative tokens across the conversation
    pub total_tokens: u64,
}

/// A fully enriched inbound request, ready for policy evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedRequest {
    /// Unique request identifier assigned at ingress
    pub request_id: String,

    /// The request as received from the client
    pub original: OriginalRequest,

    /// Token estimate
    #[serde(default)]
    pub token_estimate: TokenEstimate,

    /// Cost estimate
    #[serde(default)]
    pub cost_estimate: CostEstimate,

    /// Content analysis results
    #[serde(default)]
    pub content_analysis: ContentAnalysis,

    /// Conversation context
    #[serde(default)]
    pub conversation_context: ConversationContext,

    /// Model family (gpt, claude, llama, ...)
    #[serde(default)]
    pub model_family: String,

    /// Pricing tier the model belongs to
    #[serde(default)]
    pub pricing_tier: String,

    /// Estimated upstream latency in milliseconds
    #[serde(default)]
    pub estimated_latency_ms: u64,

    /// Request complexity score (0.0-1.0)
    #[serde(default)]
    pub complexity_score: f64,

    /// Aggregate risk score (0.0-1.0)
    #[serde(default)]
    pub risk_score: f64,

    /// Free-form metadata attached by middleware, addressable from
    /// policies under the `metadata.` root
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Ingress timestamp
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl EnrichedRequest {
    /// Create an enriched request with empty enrichment data
    pub fn new(request_id: impl Into<String>, original: OriginalRequest) -> Self {
        Self {
            request_id: request_id.into(),
            original,
            token_estimate: TokenEstimate::default(),
            cost_estimate: CostEstimate::default(),
            content_analysis: ContentAnalysis::default(),
            conversation_context: ConversationContext::default(),
            model_family: String::new(),
            pricing_tier: String::new(),
            estimated_latency_ms: 0,
            complexity_score: 0.0,
            risk_score: 0.0,
            metadata: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Set the token estimate
    pub fn with_token_estimate(mut self, estimate: TokenEstimate) -> Self {
        self.token_estimate = estimate;
        self
    }

    /// Set the cost estimate
    pub fn with_cost_estimate(mut self, estimate: CostEstimate) -> Self {
        self.cost_estimate = estimate;
        self
    }

    /// Set the content analysis results
    pub fn with_content_analysis(mut self, analysis: ContentAnalysis) -> Self {
        self.content_analysis = analysis;
        self
    }

    /// Set a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Actual token usage reported by the upstream provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens consumed
    pub prompt_tokens: u64,

    /// Completion tokens generated
    pub completion_tokens: u64,

    /// Total tokens
    pub total_tokens: u64,
}

/// Finish-reason analysis for a completed response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinishAnalysis {
    /// Raw finish reason (stop, length, content_filter, ...)
    pub reason: String,

    /// Whether the completion was truncated by the token cap
    #[serde(default)]
    pub truncated: bool,

    /// Whether the provider's own content filter intervened
    #[serde(default)]
    pub filtered: bool,
}

/// Latency breakdown for a completed round trip
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    /// Total wall-clock milliseconds
    pub total_ms: u64,

    /// Milliseconds spent in the upstream provider
    pub upstream_ms: u64,

    /// Milliseconds added by the gateway
    pub gateway_ms: u64,
}

/// Quality metrics attached by the response enrichment pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Aggregate quality score (0.0-1.0)
    pub score: f64,

    /// Refusal likelihood (0.0-1.0)
    #[serde(default)]
    pub refusal_score: f64,
}

/// A fully enriched upstream response, ready for post-response policies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedResponse {
    /// Request identifier this response belongs to
    pub request_id: String,

    /// Model that actually served the request
    pub model: String,

    /// Response content
    #[serde(default)]
    pub content: String,

    /// Actual token usage
    #[serde(default)]
    pub usage: TokenUsage,

    /// Actual cost, from configured per-1000-token rates
    #[serde(default)]
    pub actual_cost: f64,

    /// Finish-reason analysis
    #[serde(default)]
    pub finish: FinishAnalysis,

    /// Latency breakdown
    #[serde(default)]
    pub latency: LatencyBreakdown,

    /// Quality metrics
    #[serde(default)]
    pub quality: QualityMetrics,

    /// Content analysis of the response body
    #[serde(default)]
    pub content_analysis: ContentAnalysis,

    /// Free-form metadata addressable under the `metadata.` root
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,

    /// Completion timestamp
    #[serde(default = "Utc::now")]
    pub completed_at: DateTime<Utc>,
}

impl EnrichedResponse {
    /// Create an enriched response with empty enrichment data
    pub fn new(request_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model: model.into(),
            content: String::new(),
            usage: TokenUsage::default(),
            actual_cost: 0.0,
            finish: FinishAnalysis::default(),
            latency: LatencyBreakdown::default(),
            quality: QualityMetrics::default(),
            content_analysis: ContentAnalysis::default(),
            metadata: BTreeMap::new(),
            completed_at: Utc::now(),
        }
    }

    /// Set the token usage
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Set the actual cost
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.actual_cost = cost;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_text_concatenation() {
        let mut original = OriginalRequest::new("gpt-4");
        original.messages.push(ChatMessage::system("Be helpful"));
        original.messages.push(ChatMessage::user("Hello"));

        assert_eq!(original.prompt_text(), "Be helpful\nHello");
    }

    #[test]
    fn test_enriched_request_builders() {
        let request = EnrichedRequest::new("req-1", OriginalRequest::new("claude-3-sonnet"))
            .with_token_estimate(TokenEstimate {
                prompt_tokens: 100,
                completion_tokens: 400,
                total_tokens: 500,
            })
            .with_metadata("team", Value::String("search".to_string()));

        assert_eq!(request.token_estimate.total_tokens, 500);
        assert_eq!(
            request.metadata.get("team"),
            Some(&Value::String("search".to_string()))
        );
    }

    #[test]
    fn test_enriched_request_round_trip() {
        let request = EnrichedRequest::new("req-2", OriginalRequest::new("gpt-4"));
        let json = serde_json::to_string(&request).unwrap();
        let back: EnrichedRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, "req-2");
        assert_eq!(back.original.model, "gpt-4");
    }
}
