//! Enforcement
//!
//! Turns a limit violation into an actionable outcome. The downgrade
//! action consults a configured cheaper-model alias map and falls back to
//! blocking when the requested model has no alias.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome kind applied to a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementAction {
    /// Reject the request
    #[default]
    Block,
    /// Signal the caller to queue the request; the core does not queue
    Queue,
    /// Substitute a configured cheaper model
    Downgrade,
    /// Let the request through and raise an alert
    Alert,
    /// Let the request through
    Allow,
}

impl EnforcementAction {
    /// Action spelling used in results and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Queue => "queue",
            Self::Downgrade => "downgrade",
            Self::Alert => "alert",
            Self::Allow => "allow",
        }
    }
}

/// Structured enforcement result
#[derive(Debug, Clone)]
pub struct EnforcementOutcome {
    /// Whether the request may proceed
    pub allowed: bool,

    /// The action actually applied (downgrade without an alias becomes
    /// block)
    pub action: EnforcementAction,

    /// Substitute model for a successful downgrade
    pub downgrade_to: Option<String>,
}

/// Violation-to-outcome mapper
pub struct Enforcer {
    default_action: EnforcementAction,
    downgrade_map: BTreeMap<String, String>,
}

impl Enforcer {
    /// Create an enforcer with the configured default action and
    /// downgrade aliases
    pub fn new(default_action: EnforcementAction, downgrade_map: BTreeMap<String, String>) -> Self {
        Self {
            default_action,
            downgrade_map,
        }
    }

    /// Resolve the outcome for a violation on the given model
    pub fn enforce(&self, model: &str) -> EnforcementOutcome {
        match self.default_action {
            EnforcementAction::Block => EnforcementOutcome {
                allowed: false,
                action: EnforcementAction::Block,
                downgrade_to: None,
            },
            EnforcementAction::Queue => EnforcementOutcome {
                allowed: false,
                action: EnforcementAction::Queue,
                downgrade_to: None,
            },
            EnforcementAction::Allow => EnforcementOutcome {
                allowed: true,
                action: EnforcementAction::Allow,
                downgrade_to: None,
            },
            EnforcementAction::Alert => EnforcementOutcome {
                allowed: true,
                action: EnforcementAction::Alert,
                downgrade_to: None,
            },
            EnforcementAction::Downgrade => match self.downgrade_map.get(model) {
                Some(alias) => {
                    debug!(model = %model, downgrade_to = %alias, "Downgrading model");
                    EnforcementOutcome {
                        allowed: true,
                        action: EnforcementAction::Downgrade,
                        downgrade_to: Some(alias.clone()),
                    }
                }
                // No alias for this model; fall back to blocking
                None => EnforcementOutcome {
                    allowed: false,
                    action: EnforcementAction::Block,
                    downgrade_to: None,
                },
            },
        }
    }
}
