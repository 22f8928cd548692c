//! Policy condition definitions

use jupiter_core::Value;
use serde::{Deserialize, Serialize};

/// Condition tree for a policy rule
///
/// Leaf nodes compare a field against an expected value or dispatch a
/// built-in function; interior nodes compose children with boolean logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum ConditionNode {
    /// Field comparison: `field operator value`
    Simple {
        /// Dot-path field reference (request.model, metadata.team, ...)
        field: String,

        /// Comparison operator
        operator: ConditionOperator,

        /// Expected value; may be a `$variable` reference
        value: Value,
    },

    /// Conjunction: every child must match
    All {
        /// Child conditions
        conditions: Vec<ConditionNode>,
    },

    /// Disjunction: at least one child must match
    Any {
        /// Child conditions
        conditions: Vec<ConditionNode>,
    },

    /// Negation of exactly one child
    Not {
        /// Negated condition
        condition: Box<ConditionNode>,
    },

    /// Built-in function dispatch (has_pii, has_injection, in_business_hours)
    Function {
        /// Function name
        function: String,

        /// Function arguments
        #[serde(default)]
        args: Vec<Value>,
    },
}

/// Comparison operators for simple conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    /// Equality; numeric values compare cross-type, everything else
    /// compares structurally
    #[serde(rename = "==")]
    Eq,

    /// Negated equality
    #[serde(rename = "!=")]
    Ne,

    /// Numeric less-than
    #[serde(rename = "<")]
    Lt,

    /// Numeric greater-than
    #[serde(rename = ">")]
    Gt,

    /// Numeric less-than-or-equal
    #[serde(rename = "<=")]
    Le,

    /// Numeric greater-than-or-equal
    #[serde(rename = ">=")]
    Ge,

    /// Substring on strings, element membership on arrays
    #[serde(rename = "contains")]
    Contains,

    /// Regular-expression match; the expected value is the pattern
    #[serde(rename = "matches")]
    Matches,

    /// String prefix
    #[serde(rename = "starts_with")]
    StartsWith,

    /// String suffix
    #[serde(rename = "ends_with")]
    EndsWith,

    /// Membership of the actual value in the expected array
    #[serde(rename = "in")]
    In,

    /// Negated membership
    #[serde(rename = "not_in")]
    NotIn,
}

impl ConditionOperator {
    /// Operator spelling as it appears in policy documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Contains => "contains",
            Self::Matches => "matches",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }
}

impl ConditionNode {
    /// Visit every `matches` pattern in the tree, in document order.
    ///
    /// Reload uses this to pre-compile patterns so a malformed regex is a
    /// validation error rather than a per-request evaluation error.
    pub fn visit_patterns(&self, visit: &mut dyn FnMut(&str)) {
        match self {
            ConditionNode::Simple {
                operator: ConditionOperator::Matches,
                value: Value::String(pattern),
                ..
            } => visit(pattern),
            ConditionNode::Simple { .. } | ConditionNode::Function { .. } => {}
            ConditionNode::All { conditions } | ConditionNode::Any { conditions } => {
                for child in conditions {
                    child.visit_patterns(visit);
                }
            }
            ConditionNode::Not { condition } => condition.visit_patterns(visit),
        }
    }
}
