//! Credential storage for provider API keys
//!
//! The store is the source of truth for credential status. Pools read a
//! snapshot at selection time and write every status change back through
//! `CredentialStore::update_status`, which applies the change atomically to
//! one row. Concurrent writers to the same credential are last-write-wins;
//! there is no version check.
//!
//! Two implementations:
//! - `FileStore`: JSON file, atomic temp-file + rename on every write
//! - `MemoryStore`: in-process table for tests and ephemeral runs

pub mod credential;
pub mod error;
pub mod file;
pub mod memory;

pub use credential::{Credential, KeyStatus, StatusChange};
pub use error::{Error, Result};
pub use file::FileStore;
pub use memory::MemoryStore;

use common::BoxFuture;

/// Persistence boundary for credentials.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn CredentialStore>`).
pub trait CredentialStore: Send + Sync {
    /// All credentials a user holds for one provider, in id order.
    fn list_by_provider<'a>(
        &'a self,
        user_id: &'a str,
        provider: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Credential>>>;

    /// Apply a status change and return the updated credential.
    fn update_status<'a>(
        &'a self,
        id: &'a str,
        change: StatusChange,
    ) -> BoxFuture<'a, Result<Credential>>;

    /// Record that a credential did work at `used_at`.
    fn touch_used<'a>(&'a self, id: &'a str, used_at: u64) -> BoxFuture<'a, Result<()>>;

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Credential>>>;
}
