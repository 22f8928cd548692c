//! Priority normalization
//!
//! Evaluation order is deterministic: policies sort by effective priority
//! descending with ties broken by name ascending, and rules sort the same
//! way within their policy. Effective priorities are written back into the
//! documents before publication, so normalizing an already-normalized
//! list is a no-op.

use crate::action::Action;
use crate::rule::{Policy, Rule};

/// Priority assigned to blocking policies/rules when none is declared
pub const PRIORITY_BLOCKING: i64 = 100;

/// Priority assigned to routing policies/rules when none is declared
pub const PRIORITY_ROUTING: i64 = 50;

/// Priority assigned to everything else when none is declared
pub const PRIORITY_DEFAULT: i64 = 10;

/// Effective priority of a rule: the explicit value if non-zero, else
/// inferred from its action types
pub fn effective_rule_priority(rule: &Rule) -> i64 {
    if rule.priority != 0 {
        rule.priority
    } else {
        infer_from_actions(&rule.actions)
    }
}

/// Effective priority of a policy: the explicit value if non-zero, else a
/// tag hint, else inferred from the action types of its enabled rules
pub fn effective_policy_priority(policy: &Policy) -> i64 {
    if policy.priority != 0 {
        return policy.priority;
    }

    if let Some(hint) = tag_hint(&policy.tags) {
        return hint;
    }

    policy
        .rules
        .iter()
        .filter(|r| r.enabled)
        .map(|r| infer_from_actions(&r.actions))
        .max()
        .unwrap_or(PRIORITY_DEFAULT)
}

/// Normalize a policy list in place: write effective priorities and sort
/// policies and rules into deterministic evaluation order
pub fn normalize(policies: &mut [Policy]) {
    for policy in policies.iter_mut() {
        for rule in policy.rules.iter_mut() {
            rule.priority = effective_rule_priority(rule);
        }
        policy.priority = effective_policy_priority(policy);
        policy
            .rules
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
    }
    policies.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
}

fn infer_from_actions(actions: &[Action]) -> i64 {
    if actions.iter().any(|a| a.action.is_blocking()) {
        PRIORITY_BLOCKING
    } else if actions
        .iter()
        .any(|a| a.action == crate::ActionType::Route)
    {
        PRIORITY_ROUTING
    } else {
        PRIORITY_DEFAULT
    }
}

fn tag_hint(tags: &[String]) -> Option<i64> {
    let mut hint = None;
    for tag in tags {
        let candidate = match tag.to_ascii_lowercase().as_str() {
            "security" | "compliance" | "blocking" => PRIORITY_BLOCKING,
            "routing" | "transformation" => PRIORITY_ROUTING,
            "monitoring" | "tagging" | "analytics" => PRIORITY_DEFAULT,
            _ => continue,
        };
        hint = Some(hint.map_or(candidate, |h: i64| h.max(candidate)));
    }
    hint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionType;

    fn rule(name: &str, priority: i64, action: ActionType) -> Rule {
        Rule {
            name: name.to_string(),
            description: String::new(),
            priority,
            enabled: true,
            conditions: None,
            actions: vec![Action::new(action)],
        }
    }

    fn policy(name: &str, tags: &[&str], rules: Vec<Rule>) -> Policy {
        Policy {
            name: name.to_string(),
            description: String::new(),
            version: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            priority: 0,
            variables: Default::default(),
            rules,
        }
    }

    #[test]
    fn test_rule_priority_inference() {
        assert_eq!(
            effective_rule_priority(&rule("a", 0, ActionType::Deny)),
            PRIORITY_BLOCKING
        );
        assert_eq!(
            effective_rule_priority(&rule("a", 0, ActionType::Route)),
            PRIORITY_ROUTING
        );
        assert_eq!(
            effective_rule_priority(&rule("a", 0, ActionType::Tag)),
            PRIORITY_DEFAULT
        );
        // Explicit priority wins
        assert_eq!(effective_rule_priority(&rule("a", 7, ActionType::Deny)), 7);
    }

    #[test]
    fn test_policy_tag_hint_beats_rule_inference() {
        let p = policy("p", &["routing"], vec![rule("r", 0, ActionType::Deny)]);
        assert_eq!(effective_policy_priority(&p), PRIORITY_ROUTING);
    }

    #[test]
    fn test_policy_inference_from_enabled_rules() {
        let mut disabled = rule("off", 0, ActionType::Deny);
        disabled.enabled = false;
        let p = policy(
            "p",
            &[],
            vec![disabled, rule("on", 0, ActionType::Route)],
        );
        assert_eq!(effective_policy_priority(&p), PRIORITY_ROUTING);
    }

    #[test]
    fn test_normalize_orders_descending_then_name() {
        let mut policies = vec![
            policy("b-monitor", &["monitoring"], vec![rule("r", 0, ActionType::Tag)]),
            policy("a-monitor", &["monitoring"], vec![rule("r", 0, ActionType::Tag)]),
            policy("z-security", &["security"], vec![rule("r", 0, ActionType::Deny)]),
        ];
        normalize(&mut policies);

        let names: Vec<&str> = policies.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["z-security", "a-monitor", "b-monitor"]);
    }

    #[test]
    fn test_normalize_sorts_rules_within_policy() {
        let mut policies = vec![policy(
            "p",
            &[],
            vec![
                rule("tagger", 0, ActionType::Tag),
                rule("denier", 0, ActionType::Deny),
                rule("router", 0, ActionType::Route),
            ],
        )];
        normalize(&mut policies);

        let names: Vec<&str> = policies[0].rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["denier", "router", "tagger"]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let mut policies = vec![
            policy("p1", &["security"], vec![rule("a", 0, ActionType::Deny)]),
            policy("p2", &[], vec![rule("b", 0, ActionType::Tag)]),
        ];
        normalize(&mut policies);
        let once = serde_yaml::to_string(&policies).unwrap();
        normalize(&mut policies);
        let twice = serde_yaml::to_string(&policies).unwrap();
        assert_eq!(once, twice);
    }
}
