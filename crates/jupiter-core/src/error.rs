//! Error types for the governance decision engine

use std::time::Duration;

/// Result type alias using Jupiter's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for policy evaluation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A rule or policy deadline expired mid-evaluation
    #[error("evaluation of rule '{rule}' in policy '{policy}' timed out after {elapsed:?}")]
    Timeout {
        /// Policy being evaluated when the deadline expired
        policy: String,
        /// Rule being evaluated when the deadline expired
        rule: String,
        /// Elapsed time at the point of expiry
        elapsed: Duration,
    },

    /// Condition evaluation failed (operator or field resolution)
    #[error("condition on '{field}' failed in policy '{policy}' rule '{rule}': {cause}")]
    Condition {
        /// Policy containing the failing condition
        policy: String,
        /// Rule containing the failing condition
        rule: String,
        /// Field path the condition referenced
        field: String,
        /// Underlying failure description
        cause: String,
    },

    /// Action execution failed
    #[error("action '{action}' failed in policy '{policy}' rule '{rule}': {cause}")]
    Action {
        /// Policy containing the failing action
        policy: String,
        /// Rule containing the failing action
        rule: String,
        /// Action type that failed
        action: String,
        /// Underlying failure description
        cause: String,
    },

    /// A policy set was rejected during reload validation
    #[error("policy validation failed: {0}")]
    Validation(String),

    /// The policy source failed during reload
    #[error("policy reload failed: {0}")]
    Reload(String),

    /// A referenced field path does not resolve on the evaluated object
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// An operator received a value of the wrong type
    #[error("type mismatch on '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field path the operator was applied to
        field: String,
        /// Expected value kind
        expected: &'static str,
        /// Actual value kind
        actual: &'static str,
    },

    /// A routing action referenced an unknown provider
    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a new condition error
    pub fn condition(
        policy: impl Into<String>,
        rule: impl Into<String>,
        field: impl Into<String>,
        cause: impl ToString,
    ) -> Self {
        Self::Condition {
            policy: policy.into(),
            rule: rule.into(),
            field: field.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a new action error
    pub fn action(
        policy: impl Into<String>,
        rule: impl Into<String>,
        action: impl Into<String>,
        cause: impl ToString,
    ) -> Self {
        Self::Action {
            policy: policy.into(),
            rule: rule.into(),
            action: action.into(),
            cause: cause.to_string(),
        }
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new reload error
    pub fn reload(msg: impl Into<String>) -> Self {
        Self::Reload(msg.into())
    }

    /// Create a new field-not-found error
    pub fn field_not_found(path: impl Into<String>) -> Self {
        Self::FieldNotFound(path.into())
    }

    /// Whether this error is a missing-field resolution failure.
    ///
    /// The matcher uses this to apply the fail-safe policy instead of
    /// aborting the evaluation.
    pub fn is_field_not_found(&self) -> bool {
        matches!(self, Self::FieldNotFound(_))
    }

    /// Whether this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
