//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::context::DecisionAction;

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum policies accepted by a reload
    #[serde(default = "default_max_policies")]
    pub max_policies: usize,

    /// Maximum rules per policy accepted by a reload
    #[serde(default = "default_max_rules_per_policy")]
    pub max_rules_per_policy: usize,

    /// Per-evaluation policy deadline in milliseconds
    #[serde(default = "default_policy_timeout_ms")]
    pub policy_timeout_ms: u64,

    /// Per-rule deadline in milliseconds; never extends past the policy
    /// deadline
    #[serde(default = "default_rule_timeout_ms")]
    pub rule_timeout_ms: u64,

    /// Strategy for converting engine errors into decisions
    #[serde(default)]
    pub fail_safe_mode: FailSafeMode,

    /// Decision action used by `fail_safe_mode = default`
    #[serde(default = "default_action")]
    pub default_action: DecisionAction,

    /// Attach a per-evaluation trace to decisions
    #[serde(default)]
    pub enable_tracing: bool,

    /// Window evaluated by the `in_business_hours` condition function
    #[serde(default)]
    pub business_hours: BusinessHoursConfig,
}

impl EngineConfig {
    /// Policy deadline as a duration
    pub fn policy_timeout(&self) -> Duration {
        Duration::from_millis(self.policy_timeout_ms)
    }

    /// Rule deadline as a duration
    pub fn rule_timeout(&self) -> Duration {
        Duration::from_millis(self.rule_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_policies: default_max_policies(),
            max_rules_per_policy: default_max_rules_per_policy(),
            policy_timeout_ms: default_policy_timeout_ms(),
            rule_timeout_ms: default_rule_timeout_ms(),
            fail_safe_mode: FailSafeMode::default(),
            default_action: default_action(),
            enable_tracing: false,
            business_hours: BusinessHoursConfig::default(),
        }
    }
}

/// Strategy for converting an engine error into a user-facing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailSafeMode {
    /// Errors allow the request through
    #[default]
    FailOpen,
    /// Errors block the request
    FailClosed,
    /// Errors resolve to the configured default action
    FailSafeDefault,
}

/// Weekday/hour window for the `in_business_hours` condition function
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    /// IANA timezone name the window is evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Weekdays inside the window (mon..sun, lowercase)
    #[serde(default = "default_days")]
    pub days: Vec<String>,

    /// First hour inside the window (inclusive, 0-23)
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,

    /// First hour outside the window (exclusive, 1-24)
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            days: default_days(),
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

fn default_max_policies() -> usize {
    100
}

fn default_max_rules_per_policy() -> usize {
    100
}

fn default_policy_timeout_ms() -> u64 {
    250
}

fn default_rule_timeout_ms() -> u64 {
    50
}

fn default_action() -> DecisionAction {
    DecisionAction::Allow
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_days() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    17
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.fail_safe_mode, FailSafeMode::FailOpen);
        assert!(config.rule_timeout() <= config.policy_timeout());
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let yaml = r#"
fail_safe_mode: fail-closed
policy_timeout_ms: 100
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fail_safe_mode, FailSafeMode::FailClosed);
        assert_eq!(config.policy_timeout_ms, 100);
        assert_eq!(config.rule_timeout_ms, default_rule_timeout_ms());
        assert_eq!(config.business_hours.timezone, "UTC");
    }
}
