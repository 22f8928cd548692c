//! In-memory storage backend
//!
//! A keyed map with LRU eviction above the configured entry cap and a
//! background task that periodically drops state past the retention
//! period.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{Dimension, StorageConfig};
use crate::error::LimitsError;
use crate::storage::{LimitState, StorageBackend};

struct StoredEntry {
    state: LimitState,
    last_access: u64,
}

/// In-memory storage with LRU eviction and retention cleanup
pub struct MemoryStorage {
    max_entries: usize,
    entries: Mutex<HashMap<String, StoredEntry>>,
    access_counter: AtomicU64,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStorage {
    /// Create a backend capped at `max_entries` without background
    /// cleanup
    pub fn new(max_entries: usize) -> Arc<Self> {
        Arc::new(Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            access_counter: AtomicU64::new(0),
            cleanup_task: Mutex::new(None),
        })
    }

    /// Create a backend from configuration with the periodic retention
    /// cleanup task running
    pub fn with_cleanup(config: &StorageConfig) -> Arc<Self> {
        let storage = Self::new(config.max_entries);
        let retention = config.retention();
        let interval = config.cleanup_interval();

        let weak: Weak<Self> = Arc::downgrade(&storage);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(storage) = weak.upgrade() else { break };
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
                match storage.cleanup(cutoff).await {
                    Ok(0) => {}
                    Ok(removed) => debug!(removed, "Evicted stale limiter state"),
                    Err(e) => warn!("Limiter state cleanup failed: {}", e),
                }
            }
        });
        *storage.cleanup_task.lock() = Some(handle);
        storage
    }

    fn next_access(&self) -> u64 {
        self.access_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_if_needed(&self, entries: &mut HashMap<String, StoredEntry>) {
        while entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "LRU-evicting limiter state");
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no entries are stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save(&self, state: &LimitState) -> Result<(), LimitsError> {
        state.validate()?;
        let access = self.next_access();
        let mut entries = self.entries.lock();
        entries.insert(
            state.storage_key(),
            StoredEntry {
                state: state.clone(),
                last_access: access,
            },
        );
        self.evict_if_needed(&mut entries);
        Ok(())
    }

    async fn load(
        &self,
        identifier: &str,
        dimension: Dimension,
    ) -> Result<Option<LimitState>, LimitsError> {
        if identifier.trim().is_empty() {
            return Err(LimitsError::InvalidIdentifier(
                "empty identifier".to_string(),
            ));
        }
        let access = self.next_access();
        let key = format!("{}:{}", dimension.as_str(), identifier);
        let mut entries = self.entries.lock();
        Ok(entries.get_mut(&key).map(|entry| {
            entry.last_access = access;
            entry.state.clone()
        }))
    }

    async fn delete(&self, identifier: &str, dimension: Dimension) -> Result<(), LimitsError> {
        let key = format!("{}:{}", dimension.as_str(), identifier);
        self.entries.lock().remove(&key);
        Ok(())
    }

    async fn list(&self, dimension: Dimension) -> Result<Vec<String>, LimitsError> {
        let entries = self.entries.lock();
        let mut identifiers: Vec<String> = entries
            .values()
            .filter(|entry| entry.state.dimension == dimension)
            .map(|entry| entry.state.identifier.clone())
            .collect();
        identifiers.sort();
        Ok(identifiers)
    }

    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, LimitsError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.state.last_updated >= older_than);
        Ok(before - entries.len())
    }

    async fn close(&self) -> Result<(), LimitsError> {
        if let Some(handle) = self.cleanup_task.lock().take() {
            handle.abort();
        }
        Ok(())
    }
}
