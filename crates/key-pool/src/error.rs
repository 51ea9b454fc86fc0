//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The store holds no credentials at all for this user and provider.
    #[error("no credentials available for provider {provider}")]
    NoCredentialsAvailable { provider: String },

    /// Every credential is excluded or still cooling down.
    #[error("no replacement available for provider {provider} ({excluded} excluded)")]
    NoReplacementAvailable { provider: String, excluded: usize },

    #[error("credential store error: {0}")]
    Store(#[from] key_store::Error),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
