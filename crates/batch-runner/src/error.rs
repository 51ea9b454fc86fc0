//! Error types for batch execution

use key_store::StatusChange;
use provider::TaskError;

/// Why a single attempt at a work item failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Remote(#[from] TaskError),

    /// Run reached a terminal state other than success.
    #[error("remote run ended with status {status}")]
    RunFailed { status: String },

    /// Run did not finish within the poll bound.
    #[error("remote run still running after {waited_secs}s")]
    Timeout { waited_secs: u64 },

    #[error("remote run returned no data")]
    NoData,
}

impl AttemptError {
    /// Status change the attempt's credential earns. Only classified account
    /// failures touch status; run failures, timeouts and empty results only
    /// exclude the credential for the item.
    pub fn penalty(&self, now_millis: u64) -> Option<StatusChange> {
        match self {
            AttemptError::Remote(err) => key_pool::penalty_for(err, now_millis),
            _ => None,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Remote(err) => err.kind(),
            AttemptError::RunFailed { .. } => "run_failed",
            AttemptError::Timeout { .. } => "timeout",
            AttemptError::NoData => "no_data",
        }
    }
}

/// Errors that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] key_pool::Error),
}

/// Result alias for batch operations.
pub type Result<T> = std::result::Result<T, Error>;
