//! Compiled regex pattern cache
//!
//! Pattern strings come from validated policy text that is immutable
//! after load, so the cache never needs invalidation. Reload pre-compiles
//! every `matches` pattern; the cache also compiles on demand for
//! redaction patterns supplied through action parameters.

use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-wide cache of compiled regular expressions keyed by pattern
/// string
#[derive(Default)]
pub struct PatternCache {
    inner: RwLock<HashMap<String, Arc<Regex>>>,
}

impl PatternCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a compiled pattern, compiling and caching it on first use
    pub fn get(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(compiled) = self.inner.read().get(pattern) {
            return Ok(compiled.clone());
        }

        let compiled = Arc::new(Regex::new(pattern)?);
        self.inner
            .write()
            .entry(pattern.to_string())
            .or_insert_with(|| compiled.clone());
        Ok(compiled)
    }

    /// Number of cached patterns
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_once() {
        let cache = PatternCache::new();
        let first = cache.get("^gpt-4").unwrap();
        let second = cache.get("^gpt-4").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_malformed_pattern_is_error() {
        let cache = PatternCache::new();
        assert!(cache.get("([unclosed").is_err());
        assert!(cache.is_empty());
    }
}
