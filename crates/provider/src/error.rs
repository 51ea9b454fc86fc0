//! Typed failures from the remote task API

/// Classified remote failure.
///
/// - `Auth` and `Quota` mean the account behind the credential cannot do work
///   right now (rejected token, exhausted credits or plan limits).
/// - `RateLimited` is an explicit provider throttle signal.
/// - `Transient` is everything else: network trouble, 5xx, malformed replies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("quota exhausted: {0}")]
    Quota(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient failure: {0}")]
    Transient(String),
}

impl TaskError {
    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Auth(_) => "auth",
            TaskError::Quota(_) => "quota",
            TaskError::RateLimited(_) => "rate_limited",
            TaskError::Transient(_) => "transient",
        }
    }
}

/// Result alias for remote task operations.
pub type Result<T> = std::result::Result<T, TaskError>;
