//! Credential model and status transitions
//!
//! `StatusChange` is the only way a credential's status moves. Each variant
//! writes `status`, `failure_count` and the timestamps as one unit, so the
//! failure fields never drift apart.

use std::collections::BTreeMap;
use std::fmt;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Health state of a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    RateLimited,
    Failed,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::RateLimited => "rate_limited",
            KeyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider API key owned by a user.
///
/// Timestamps are unix milliseconds. `id` is the store key and is not part of
/// the serialized record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(skip)]
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub display_name: String,
    pub api_key: Secret<String>,
    pub status: KeyStatus,
    #[serde(default)]
    pub last_used_at: Option<u64>,
    #[serde(default)]
    pub last_failed_at: Option<u64>,
    #[serde(default)]
    pub failure_count: u32,
}

impl Credential {
    /// New active credential that has never been used.
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        display_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            display_name: display_name.into(),
            api_key: Secret::new(api_key.into()),
            status: KeyStatus::Active,
            last_used_at: None,
            last_failed_at: None,
            failure_count: 0,
        }
    }
}

/// A status write, applied atomically to one credential row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// Credential proved usable: `active`, failure state cleared, marked used.
    Recovered { used_at: u64 },
    /// Provider throttled the credential.
    RateLimited { failed_at: u64 },
    /// Auth rejected, quota exhausted, or probe failed outright.
    Failed { failed_at: u64 },
}

impl StatusChange {
    /// Status this change writes.
    pub fn status(&self) -> KeyStatus {
        match self {
            StatusChange::Recovered { .. } => KeyStatus::Active,
            StatusChange::RateLimited { .. } => KeyStatus::RateLimited,
            StatusChange::Failed { .. } => KeyStatus::Failed,
        }
    }

    pub fn apply(&self, credential: &mut Credential) {
        credential.status = self.status();
        match *self {
            StatusChange::Recovered { used_at } => {
                credential.failure_count = 0;
                credential.last_failed_at = None;
                credential.last_used_at = Some(used_at);
            }
            StatusChange::RateLimited { failed_at } | StatusChange::Failed { failed_at } => {
                credential.failure_count = credential.failure_count.saturating_add(1);
                credential.last_failed_at = Some(failed_at);
            }
        }
    }
}

/// Persisted row: the credential plus the user that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredKey {
    pub user_id: String,
    #[serde(flatten)]
    pub credential: Credential,
}

/// In-memory credential table shared by the file and memory stores.
///
/// Ordered by id so listings are deterministic.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct KeyTable {
    rows: BTreeMap<String, StoredKey>,
}

impl KeyTable {
    /// Restore ids from map keys after deserialization.
    pub fn fill_ids(&mut self) {
        for (id, row) in self.rows.iter_mut() {
            row.credential.id = id.clone();
        }
    }

    pub fn insert(&mut self, user_id: &str, credential: Credential) {
        self.rows.insert(
            credential.id.clone(),
            StoredKey {
                user_id: user_id.to_string(),
                credential,
            },
        );
    }

    pub fn list(&self, user_id: &str, provider: &str) -> Vec<Credential> {
        self.rows
            .values()
            .filter(|row| row.user_id == user_id && row.credential.provider == provider)
            .map(|row| row.credential.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Credential> {
        self.rows.get(id).map(|row| row.credential.clone())
    }

    pub fn apply(&mut self, id: &str, change: StatusChange) -> Result<Credential> {
        let row = self.row_mut(id)?;
        change.apply(&mut row.credential);
        Ok(row.credential.clone())
    }

    pub fn touch(&mut self, id: &str, used_at: u64) -> Result<()> {
        self.row_mut(id)?.credential.last_used_at = Some(used_at);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    fn row_mut(&mut self, id: &str) -> Result<&mut StoredKey> {
        self.rows
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("credential {id} not in store")))
    }
}
