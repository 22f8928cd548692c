//! Policy action definitions

use jupiter_core::value::{Value, VariableMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Terminate evaluation with an explicit allow
    Allow,
    /// Block the request with a reason and status code
    Deny,
    /// Emit a structured log entry
    Log,
    /// Queue a content redaction directive
    Redact,
    /// Queue a request/response field transformation
    Modify,
    /// Route to a different provider or model
    Route,
    /// Queue an asynchronous notification
    Alert,
    /// Attach a key/value tag to the decision
    Tag,
    /// Rate-limit marker; enforcement of configured limits lives in the
    /// limits manager, this action only records its parameters
    RateLimit,
    /// Budget marker; same placeholder semantics as `rate_limit`
    Budget,
}

impl ActionType {
    /// Whether a failure of this action halts the containing policy
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Deny | Self::RateLimit | Self::Budget)
    }

    /// Action type spelling as it appears in policy documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Log => "log",
            Self::Redact => "redact",
            Self::Modify => "modify",
            Self::Route => "route",
            Self::Alert => "alert",
            Self::Tag => "tag",
            Self::RateLimit => "rate_limit",
            Self::Budget => "budget",
        }
    }
}

/// A single action with its parameter map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Action type
    #[serde(rename = "type")]
    pub action: ActionType,

    /// Recognized parameter keys mapped to values; unknown keys are
    /// preserved but ignored by the executor
    #[serde(flatten, default)]
    pub params: BTreeMap<String, Value>,
}

impl Action {
    /// Create an action with no parameters
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Look up a parameter, resolving `$variable` references against the
    /// owning policy's variable map. Unbound references resolve to `None`.
    pub fn param<'a>(&'a self, key: &str, vars: &'a VariableMap) -> Option<&'a Value> {
        self.params.get(key).and_then(|v| v.resolve(vars))
    }

    /// String parameter, resolved
    pub fn param_str<'a>(&'a self, key: &str, vars: &'a VariableMap) -> Option<&'a str> {
        self.param(key, vars).and_then(Value::as_str)
    }

    /// Numeric parameter, resolved
    pub fn param_f64(&self, key: &str, vars: &VariableMap) -> Option<f64> {
        self.param(key, vars).and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deny_action_deserialization() {
        let yaml = r#"
type: deny
message: GPT-4 blocked
status_code: 403
"#;
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(action.action, ActionType::Deny);
        assert!(action.action.is_blocking());

        let vars = VariableMap::new();
        assert_eq!(action.param_str("message", &vars), Some("GPT-4 blocked"));
        assert_eq!(action.param_f64("status_code", &vars), Some(403.0));
    }

    #[test]
    fn test_blocking_classification() {
        assert!(ActionType::Deny.is_blocking());
        assert!(ActionType::RateLimit.is_blocking());
        assert!(ActionType::Budget.is_blocking());
        assert!(!ActionType::Allow.is_blocking());
        assert!(!ActionType::Tag.is_blocking());
        assert!(!ActionType::Route.is_blocking());
    }

    #[test]
    fn test_param_variable_resolution() {
        let action = Action::new(ActionType::Deny)
            .with_param("message", Value::Var("deny_message".to_string()));

        let mut vars = VariableMap::new();
        vars.insert(
            "deny_message".to_string(),
            Value::String("Not allowed".to_string()),
        );

        assert_eq!(action.param_str("message", &vars), Some("Not allowed"));

        let empty = VariableMap::new();
        assert_eq!(action.param_str("message", &empty), None);
    }

    #[test]
    fn test_snake_case_type_tags() {
        let yaml = "type: rate_limit\nlimit: 100\nwindow: minute\n";
        let action: Action = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(action.action, ActionType::RateLimit);
    }
}
