//! Error types for the limits subsystem

/// Errors surfaced by the limits manager and its storage backends
#[derive(Debug, thiserror::Error)]
pub enum LimitsError {
    /// A request-rate or token-rate limit was exceeded
    #[error("rate limit exceeded for '{0}'")]
    RateLimitExceeded(String),

    /// A budget window was exceeded
    #[error("budget exceeded for '{0}'")]
    BudgetExceeded(String),

    /// An empty or malformed identifier reached the manager or storage
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// A storage backend failed
    #[error("storage failure: {0}")]
    Storage(String),

    /// The persistence queue is full; the snapshot was dropped
    #[error("persistence queue full")]
    QueueFull,
}

impl LimitsError {
    /// Create a storage error
    pub fn storage(msg: impl ToString) -> Self {
        Self::Storage(msg.to_string())
    }
}
