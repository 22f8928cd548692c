//! Policy sources
//!
//! A policy source hands the engine a full policy list on demand and may
//! publish change events the engine's watcher reacts to by reloading.

use async_trait::async_trait;
use jupiter_core::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::rule::Policy;

/// Kind of change a source observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyEventKind {
    /// A policy appeared
    Created,
    /// A policy changed
    Modified,
    /// A policy disappeared
    Deleted,
}

/// A change event published by a policy source
#[derive(Debug, Clone)]
pub struct PolicyEvent {
    /// Kind of change
    pub kind: PolicyEventKind,

    /// Affected policy, when the source knows it
    pub name: Option<String>,
}

/// Abstract provider of policy documents
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Load the full policy list
    async fn load(&self) -> Result<Vec<Policy>>;

    /// Subscribe to change events; sources without change detection
    /// return `None` and the engine skips the watcher
    fn subscribe(&self) -> Option<broadcast::Receiver<PolicyEvent>> {
        None
    }
}

/// In-memory source holding a fixed policy list
///
/// Useful for embedding and tests; `replace` swaps the list and publishes
/// a change event so a watching engine reloads.
pub struct StaticSource {
    policies: RwLock<Vec<Policy>>,
    events: broadcast::Sender<PolicyEvent>,
}

impl StaticSource {
    /// Create a source over a fixed policy list
    pub fn new(policies: Vec<Policy>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            policies: RwLock::new(policies),
            events,
        }
    }

    /// Replace the policy list and notify watchers
    pub fn replace(&self, policies: Vec<Policy>) {
        *self.policies.write() = policies;
        let _ = self.events.send(PolicyEvent {
            kind: PolicyEventKind::Modified,
            name: None,
        });
    }
}

#[async_trait]
impl PolicySource for StaticSource {
    async fn load(&self) -> Result<Vec<Policy>> {
        Ok(self.policies.read().clone())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PolicyEvent>> {
        Some(self.events.subscribe())
    }
}

/// Directory source scanning `*.yaml`/`*.yml` policy files
///
/// Files that fail to parse are skipped with a warning so one bad file
/// cannot take down the rest of the set. Filesystem watching is the
/// embedding process's concern; it calls [`DirectorySource::notify_changed`]
/// when it observes a change.
pub struct DirectorySource {
    dir: PathBuf,
    events: broadcast::Sender<PolicyEvent>,
}

impl DirectorySource {
    /// Create a source over a policy directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            dir: dir.into(),
            events,
        }
    }

    /// Publish a change event, triggering a reload in watching engines
    pub fn notify_changed(&self) {
        let _ = self.events.send(PolicyEvent {
            kind: PolicyEventKind::Modified,
            name: None,
        });
    }
}

#[async_trait]
impl PolicySource for DirectorySource {
    async fn load(&self) -> Result<Vec<Policy>> {
        if !self.dir.exists() {
            info!(dir = %self.dir.display(), "Policy directory does not exist, loading empty set");
            return Ok(Vec::new());
        }

        let mut policies = Vec::new();
        let mut entries: Vec<_> = std::fs::read_dir(&self.dir)
            .map_err(|e| Error::reload(format!("cannot read {}: {}", self.dir.display(), e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        entries.sort();

        for path in entries {
            match Policy::from_file(&path) {
                Ok(policy) => policies.push(policy),
                Err(e) => {
                    warn!(file = %path.display(), "Failed to load policy: {}", e);
                }
            }
        }

        Ok(policies)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<PolicyEvent>> {
        Some(self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy(name: &str) -> Policy {
        Policy::from_yaml(&format!(
            "name: {}\nrules:\n  - name: r\n    actions:\n      - type: tag\n        key: seen\n",
            name
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_static_source_load() {
        let source = StaticSource::new(vec![sample_policy("p1")]);
        let policies = source.load().await.unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name, "p1");
    }

    #[tokio::test]
    async fn test_static_source_replace_publishes_event() {
        let source = StaticSource::new(vec![]);
        let mut events = source.subscribe().unwrap();

        source.replace(vec![sample_policy("p2")]);

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, PolicyEventKind::Modified);
        assert_eq!(source.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_directory_source_missing_dir_is_empty() {
        let source = DirectorySource::new("/nonexistent/policies");
        assert!(source.load().await.unwrap().is_empty());
    }
}
