//! Limits configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::enforcer::EnforcementAction;

/// Identity axis a limit applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Per-API-key limits
    #[default]
    ApiKey,
    /// Per-end-user limits
    User,
    /// Per-team limits
    Team,
}

impl Dimension {
    /// Dimension spelling used in storage keys and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::User => "user",
            Self::Team => "team",
        }
    }

    /// Parse the storage-key spelling
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "api_key" => Some(Self::ApiKey),
            "user" => Some(Self::User),
            "team" => Some(Self::Team),
            _ => None,
        }
    }
}

/// Top-level limits configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Per-identifier limit entries; identifiers without an entry are
    /// unlimited
    #[serde(default)]
    pub identifiers: BTreeMap<String, IdentifierLimits>,

    /// Enforcement behavior on violations
    #[serde(default)]
    pub enforcement: EnforcementConfig,

    /// State persistence configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Persist limiter state on usage recording
    #[serde(default)]
    pub persist_usage: bool,
}

impl LimitsConfig {
    /// Load configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml(&content)?)
    }
}

/// Limits for one identifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifierLimits {
    /// Identity axis this identifier belongs to
    #[serde(default)]
    pub dimension: Dimension,

    /// Request- and token-rate limits
    #[serde(default)]
    pub rate_limits: RateLimitConfig,

    /// Cost budgets
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// Request- and token-rate limits; absent fields are unlimited
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,

    /// Requests per minute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<f64>,

    /// Requests per hour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<f64>,

    /// Tokens per minute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u64>,

    /// Tokens per hour
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_hour: Option<u64>,

    /// Concurrent in-flight requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u64>,
}

impl RateLimitConfig {
    /// Whether any rate limit is configured
    pub fn is_empty(&self) -> bool {
        self.requests_per_second.is_none()
            && self.requests_per_minute.is_none()
            && self.requests_per_hour.is_none()
            && self.tokens_per_minute.is_none()
            && self.tokens_per_hour.is_none()
            && self.max_concurrent.is_none()
    }
}

/// Cost budgets; windows are created only for configured limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Hourly budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly: Option<f64>,

    /// Daily budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily: Option<f64>,

    /// Monthly budget
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monthly: Option<f64>,

    /// Usage fraction that triggers an alert before the limit is reached
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: f64,
}

impl BudgetConfig {
    /// Whether any budget window is configured
    pub fn is_empty(&self) -> bool {
        self.hourly.is_none() && self.daily.is_none() && self.monthly.is_none()
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            hourly: None,
            daily: None,
            monthly: None,
            alert_threshold: default_alert_threshold(),
        }
    }
}

/// Enforcement behavior on limit violations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Outcome applied to violations
    #[serde(default)]
    pub default_action: EnforcementAction,

    /// Cheaper-model aliases used by the downgrade action
    #[serde(default)]
    pub downgrade_map: BTreeMap<String, String>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            default_action: EnforcementAction::Block,
            downgrade_map: BTreeMap::new(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// In-memory map with LRU eviction
    #[default]
    Memory,
    /// Durable single-writer SQLite database
    Sqlite,
}

/// State persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend kind
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Database path for the sqlite backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Entry cap for the memory backend before LRU eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Retention period for idle state in seconds
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Background cleanup interval in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl StorageConfig {
    /// Retention period as a duration
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Cleanup interval as a duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            path: None,
            max_entries: default_max_entries(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_alert_threshold() -> f64 {
    0.8
}

fn default_max_entries() -> usize {
    10_000
}

fn default_retention_secs() -> u64 {
    7 * 86400
}

fn default_cleanup_interval_secs() -> u64 {
    300
}
