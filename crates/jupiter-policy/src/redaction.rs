//! Redaction application
//!
//! The engine only queues redaction directives; the request forwarder
//! applies them to the outbound content with this module. Strategies:
//!
//! - `mask`: without a pattern, every character becomes `*`; with a
//!   pattern, matches are replaced with the replacement (default `***`).
//! - `remove`: without a pattern, the whole content is dropped; with a
//!   pattern, matches are deleted.
//! - `replace`: without a pattern, the whole content becomes the
//!   replacement; with a pattern, matches are replaced (default
//!   `[REDACTED]`).

use jupiter_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::context::RedactionDirective;
use crate::patterns::PatternCache;

/// How matched content is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedactionStrategy {
    /// Overwrite with `*` characters
    #[default]
    Mask,
    /// Delete outright
    Remove,
    /// Substitute replacement text
    Replace,
}

impl RedactionStrategy {
    /// Parse the strategy spelling used in action parameters
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "mask" => Some(Self::Mask),
            "remove" => Some(Self::Remove),
            "replace" => Some(Self::Replace),
            _ => None,
        }
    }
}

/// Record of one applied directive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedRedaction {
    /// Field the directive targeted
    pub field: String,

    /// Strategy applied
    pub strategy: RedactionStrategy,

    /// Number of pattern matches rewritten; whole-content strategies
    /// count as one
    pub match_count: usize,
}

/// Apply accumulated redaction directives to a content string, in order
pub fn apply_redactions(
    content: &str,
    directives: &[RedactionDirective],
    patterns: &PatternCache,
) -> Result<(String, Vec<AppliedRedaction>)> {
    let mut result = content.to_string();
    let mut applied = Vec::with_capacity(directives.len());

    for directive in directives {
        let match_count = match &directive.pattern {
            None => {
                result = match directive.strategy {
                    RedactionStrategy::Mask => "*".repeat(result.chars().count()),
                    RedactionStrategy::Remove => String::new(),
                    RedactionStrategy::Replace => directive
                        .replacement
                        .clone()
                        .unwrap_or_else(|| "[REDACTED]".to_string()),
                };
                1
            }
            Some(pattern) => {
                let regex = patterns.get(pattern).map_err(|e| {
                    Error::validation(format!("invalid redaction pattern '{}': {}", pattern, e))
                })?;
                let count = regex.find_iter(&result).count();
                if count > 0 {
                    let replacement = match directive.strategy {
                        RedactionStrategy::Mask => {
                            directive.replacement.as_deref().unwrap_or("***")
                        }
                        RedactionStrategy::Remove => "",
                        RedactionStrategy::Replace => {
                            directive.replacement.as_deref().unwrap_or("[REDACTED]")
                        }
                    };
                    result = regex.replace_all(&result, replacement).into_owned();
                }
                count
            }
        };

        applied.push(AppliedRedaction {
            field: directive.field.clone(),
            strategy: directive.strategy,
            match_count,
        });
    }

    Ok((result, applied))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(
        strategy: RedactionStrategy,
        pattern: Option<&str>,
        replacement: Option<&str>,
    ) -> RedactionDirective {
        RedactionDirective {
            field: "prompt".to_string(),
            strategy,
            pattern: pattern.map(String::from),
            replacement: replacement.map(String::from),
        }
    }

    #[test]
    fn test_mask_whole_content() {
        let cache = PatternCache::new();
        let (out, applied) = apply_redactions(
            "secret",
            &[directive(RedactionStrategy::Mask, None, None)],
            &cache,
        )
        .unwrap();
        assert_eq!(out, "******");
        assert_eq!(applied[0].match_count, 1);
    }

    #[test]
    fn test_mask_with_pattern() {
        let cache = PatternCache::new();
        let (out, applied) = apply_redactions(
            "call me at 555-1234 or 555-9876",
            &[directive(
                RedactionStrategy::Mask,
                Some(r"\d{3}-\d{4}"),
                None,
            )],
            &cache,
        )
        .unwrap();
        assert_eq!(out, "call me at *** or ***");
        assert_eq!(applied[0].match_count, 2);
    }

    #[test]
    fn test_remove_with_pattern() {
        let cache = PatternCache::new();
        let (out, _) = apply_redactions(
            "id=12345 ok",
            &[directive(RedactionStrategy::Remove, Some(r"\d+"), None)],
            &cache,
        )
        .unwrap();
        assert_eq!(out, "id= ok");
    }

    #[test]
    fn test_replace_whole_content() {
        let cache = PatternCache::new();
        let (out, _) = apply_redactions(
            "anything at all",
            &[directive(RedactionStrategy::Replace, None, Some("[GONE]"))],
            &cache,
        )
        .unwrap();
        assert_eq!(out, "[GONE]");
    }

    #[test]
    fn test_replace_pattern_default_replacement() {
        let cache = PatternCache::new();
        let (out, _) = apply_redactions(
            "user alice@example.com wrote in",
            &[directive(
                RedactionStrategy::Replace,
                Some(r"[a-z]+@[a-z]+\.[a-z]+"),
                None,
            )],
            &cache,
        )
        .unwrap();
        assert_eq!(out, "user [REDACTED] wrote in");
    }

    #[test]
    fn test_directives_apply_in_order() {
        let cache = PatternCache::new();
        let (out, applied) = apply_redactions(
            "token abc123",
            &[
                directive(RedactionStrategy::Remove, Some(r"\d+"), None),
                directive(RedactionStrategy::Mask, None, None),
            ],
            &cache,
        )
        .unwrap();
        assert_eq!(out, "*".repeat("token abc".len()));
        assert_eq!(applied.len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let cache = PatternCache::new();
        let result = apply_redactions(
            "content",
            &[directive(RedactionStrategy::Mask, Some("([bad"), None)],
            &cache,
        );
        assert!(result.is_err());
    }
}
