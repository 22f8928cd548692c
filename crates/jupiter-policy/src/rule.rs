//! Policy and rule definitions

use jupiter_core::value::VariableMap;
use serde::{Deserialize, Serialize};

use crate::{Action, ConditionNode};

/// A complete policy containing multiple rules
///
/// Policies are immutable after publication; reload builds a fresh list
/// and swaps it atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy name
    pub name: String,

    /// Description of what this policy enforces
    #[serde(default)]
    pub description: String,

    /// Version of the policy
    #[serde(default)]
    pub version: String,

    /// Classification tags; some tags hint the evaluation priority
    /// (security, compliance, blocking, routing, transformation,
    /// monitoring, tagging, analytics)
    #[serde(default)]
    pub tags: Vec<String>,

    /// Explicit priority; higher evaluates earlier. Zero means "infer
    /// from tags and rule actions" during normalization.
    #[serde(default)]
    pub priority: i64,

    /// Policy-scoped variables, referenced from conditions and actions
    /// as `$name`
    #[serde(default)]
    pub variables: VariableMap,

    /// Rules in this policy
    pub rules: Vec<Rule>,
}

impl Policy {
    /// Load a policy from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load a policy from a file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }
}

/// A single rule within a policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Rule identifier, unique within its policy
    pub name: String,

    /// Description of what this rule does
    #[serde(default)]
    pub description: String,

    /// Explicit priority; higher evaluates earlier within the policy.
    /// Zero means "infer from action types" during normalization.
    #[serde(default)]
    pub priority: i64,

    /// Whether this rule is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Condition tree; a rule with no conditions always matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ConditionNode>,

    /// Actions to take when the conditions match, executed in order
    #[serde(default)]
    pub actions: Vec<Action>,
}

fn default_true() -> bool {
    true
}
