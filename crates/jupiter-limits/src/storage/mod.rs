//! Storage backends for limiter state
//!
//! State is per-process and authoritative in memory; storage is a
//! write-behind snapshot so a restarted gateway resumes with warm
//! windows instead of empty ones. Exactly one record exists per
//! `(dimension, identifier)` pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bucket::TokenBucketState;
use crate::budget::BudgetState;
use crate::config::Dimension;
use crate::error::LimitsError;
use crate::window::SlidingWindowState;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Persisted rate-limiter state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Request-count token buckets
    #[serde(default)]
    pub request_buckets: Vec<TokenBucketState>,

    /// Token-count sliding windows
    #[serde(default)]
    pub token_windows: Vec<SlidingWindowState>,

    /// Outstanding concurrency at snapshot time
    #[serde(default)]
    pub concurrent: u64,
}

/// Full persisted state for one identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitState {
    /// Identifier the state belongs to
    pub identifier: String,

    /// Identity axis
    pub dimension: Dimension,

    /// Rate-limiter state, when rate limits are configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitState>,

    /// Budget state, when budgets are configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetState>,

    /// When this identifier was first seen
    pub created_at: DateTime<Utc>,

    /// When this state was last touched
    pub last_updated: DateTime<Utc>,
}

impl LimitState {
    /// Storage key: `dimension:identifier`
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.dimension.as_str(), self.identifier)
    }

    /// Reject empty identifiers before they reach a backend
    pub fn validate(&self) -> Result<(), LimitsError> {
        if self.identifier.trim().is_empty() {
            return Err(LimitsError::InvalidIdentifier(
                "empty identifier".to_string(),
            ));
        }
        Ok(())
    }
}

/// Persistence contract for limiter state
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Save (upsert) one identifier's state
    async fn save(&self, state: &LimitState) -> Result<(), LimitsError>;

    /// Load one identifier's state, `None` when absent
    async fn load(
        &self,
        identifier: &str,
        dimension: Dimension,
    ) -> Result<Option<LimitState>, LimitsError>;

    /// Delete one identifier's state
    async fn delete(&self, identifier: &str, dimension: Dimension) -> Result<(), LimitsError>;

    /// List stored identifiers for a dimension
    async fn list(&self, dimension: Dimension) -> Result<Vec<String>, LimitsError>;

    /// Delete state not touched since the cutoff; returns the number of
    /// deleted records
    async fn cleanup(&self, older_than: DateTime<Utc>) -> Result<usize, LimitsError>;

    /// Release backend resources; must be idempotent
    async fn close(&self) -> Result<(), LimitsError>;
}

#[cfg(test)]
pub(crate) fn sample_state(identifier: &str, dimension: Dimension) -> LimitState {
    LimitState {
        identifier: identifier.to_string(),
        dimension,
        rate_limit: Some(RateLimitState {
            request_buckets: Vec::new(),
            token_windows: Vec::new(),
            concurrent: 0,
        }),
        budget: None,
        created_at: Utc::now(),
        last_updated: Utc::now(),
    }
}
