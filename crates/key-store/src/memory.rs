//! In-memory credential store

use std::sync::{Mutex, MutexGuard};

use common::BoxFuture;

use crate::credential::{Credential, KeyTable, StatusChange};
use crate::error::Result;
use crate::CredentialStore;

/// Credential store held entirely in process memory.
#[derive(Default)]
pub struct MemoryStore {
    table: Mutex<KeyTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a credential owned by `user_id`.
    pub fn add(&self, user_id: &str, credential: Credential) {
        self.lock().insert(user_id, credential);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, KeyTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CredentialStore for MemoryStore {
    fn list_by_provider<'a>(
        &'a self,
        user_id: &'a str,
        provider: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Credential>>> {
        Box::pin(async move { Ok(self.lock().list(user_id, provider)) })
    }

    fn update_status<'a>(
        &'a self,
        id: &'a str,
        change: StatusChange,
    ) -> BoxFuture<'a, Result<Credential>> {
        Box::pin(async move { self.lock().apply(id, change) })
    }

    fn touch_used<'a>(&'a self, id: &'a str, used_at: u64) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.lock().touch(id, used_at) })
    }

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Credential>>> {
        Box::pin(async move { Ok(self.lock().get(id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyStatus;

    #[tokio::test]
    async fn update_and_touch() {
        let store = MemoryStore::new();
        store.add("u1", Credential::new("k1", "apify", "Main", "tok"));

        let updated = store
            .update_status("k1", StatusChange::RateLimited { failed_at: 42 })
            .await
            .unwrap();
        assert_eq!(updated.status, KeyStatus::RateLimited);

        store.touch_used("k1", 99).await.unwrap();
        let stored = store.get("k1").await.unwrap().unwrap();
        assert_eq!(stored.last_used_at, Some(99));
        assert_eq!(stored.last_failed_at, Some(42));
    }

    #[tokio::test]
    async fn touch_unknown_errors() {
        let store = MemoryStore::new();
        assert!(store.touch_used("ghost", 1).await.is_err());
        assert!(store.get("ghost").await.unwrap().is_none());
    }
}
