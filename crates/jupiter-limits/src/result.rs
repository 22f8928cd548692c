//! Limit check results
//!
//! [`LimitCheckResult`] is the structured outcome of one admission check.
//! It carries everything the proxy collaborator needs to respond: the
//! verdict, rate-limit and budget snapshots, the enforcement action, and
//! ready-made HTTP header pairs and block body so the wire format is
//! derived in exactly one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::enforcer::EnforcementAction;

/// Rate-limit snapshot for the violated or tightest window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Configured limit of the window
    pub limit: u64,

    /// Remaining allowance
    pub remaining: u64,

    /// When the window resets
    pub reset: DateTime<Utc>,

    /// Window spelling (second, minute, hour)
    pub window: String,
}

/// Budget snapshot for the reported window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetInfo {
    /// Configured limit
    pub limit: f64,

    /// Usage inside the window
    pub used: f64,

    /// Remaining budget
    pub remaining: f64,

    /// `used / limit`
    pub percentage: f64,

    /// When the window frees budget
    pub reset: DateTime<Utc>,

    /// Window spelling (hourly, daily, monthly)
    pub window: String,
}

/// Outcome of one `check_limits` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitCheckResult {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Human-readable violation reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Rate-limit snapshot, when a rate limit was consulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,

    /// Budget snapshot, when a budget was consulted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetInfo>,

    /// Enforcement action applied, absent for a clean pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<EnforcementAction>,

    /// Suggested wait before retrying a rejected request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<Duration>,

    /// Substitute model when the action is downgrade
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downgrade_to: Option<String>,
}

impl LimitCheckResult {
    /// A clean pass
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            rate_limit: None,
            budget: None,
            action: None,
            retry_after: None,
            downgrade_to: None,
        }
    }

    /// HTTP status the proxy should answer with when `allowed` is false
    pub fn http_status(&self) -> u16 {
        429
    }

    /// Header pairs carrying the rate-limit and budget snapshots
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        if let Some(info) = &self.rate_limit {
            headers.push(("X-RateLimit-Limit".to_string(), info.limit.to_string()));
            headers.push((
                "X-RateLimit-Remaining".to_string(),
                info.remaining.to_string(),
            ));
            headers.push((
                "X-RateLimit-Reset".to_string(),
                info.reset.timestamp().to_string(),
            ));
        }

        if let Some(info) = &self.budget {
            headers.push(("X-Budget-Limit".to_string(), format!("{:.2}", info.limit)));
            headers.push(("X-Budget-Used".to_string(), format!("{:.2}", info.used)));
            headers.push((
                "X-Budget-Remaining".to_string(),
                format!("{:.2}", info.remaining),
            ));
            headers.push((
                "X-Budget-Reset".to_string(),
                info.reset.timestamp().to_string(),
            ));
        }

        if let Some(retry_after) = self.retry_after {
            headers.push((
                "Retry-After".to_string(),
                retry_after.as_secs().max(1).to_string(),
            ));
        }

        headers
    }

    /// JSON body for a rejected request
    pub fn blocked_body(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": self
                    .reason
                    .clone()
                    .unwrap_or_else(|| "Rate limit exceeded".to_string()),
                "type": "rate_limit_exceeded",
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_pairs_for_violation() {
        let mut result = LimitCheckResult::allowed();
        result.allowed = false;
        result.reason = Some("Request rate exceeded".to_string());
        result.rate_limit = Some(RateLimitInfo {
            limit: 10,
            remaining: 0,
            reset: Utc::now(),
            window: "second".to_string(),
        });
        result.retry_after = Some(Duration::from_secs(2));

        let headers = result.header_pairs();
        assert!(headers
            .iter()
            .any(|(name, value)| name == "X-RateLimit-Limit" && value == "10"));
        assert!(headers
            .iter()
            .any(|(name, value)| name == "Retry-After" && value == "2"));
        assert_eq!(result.http_status(), 429);
    }

    #[test]
    fn test_retry_after_rounds_up_to_one_second() {
        let mut result = LimitCheckResult::allowed();
        result.retry_after = Some(Duration::from_millis(250));
        let headers = result.header_pairs();
        assert!(headers
            .iter()
            .any(|(name, value)| name == "Retry-After" && value == "1"));
    }

    #[test]
    fn test_blocked_body_shape() {
        let mut result = LimitCheckResult::allowed();
        result.allowed = false;
        result.reason = Some("Budget exceeded".to_string());

        let body = result.blocked_body();
        assert_eq!(body["error"]["message"], "Budget exceeded");
        assert_eq!(body["error"]["type"], "rate_limit_exceeded");
    }
}
