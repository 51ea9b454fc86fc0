//! JSON file credential store
//!
//! Manages a JSON file mapping credential ids to `{user_id, provider, api_key,
//! status, ...}` rows. All writes use atomic temp-file + rename to prevent
//! corruption on crash. A tokio Mutex serializes concurrent writes from probes
//! and executors running in parallel.

use std::path::{Path, PathBuf};

use common::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::CredentialStore;
use crate::credential::{Credential, KeyTable, StatusChange};
use crate::error::{Error, Result};

/// Thread-safe credential file manager.
///
/// Reads acquire the lock briefly to clone rows out of the in-memory table.
/// Every mutation rewrites the whole file while holding the lock.
pub struct FileStore {
    path: PathBuf,
    state: Mutex<KeyTable>,
}

impl FileStore {
    /// Load credentials from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}`. Pools over an empty
    /// store report `NoCredentialsAvailable` until keys are added.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let mut table: KeyTable = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            table.fill_ids();
            info!(path = %path.display(), credentials = table.len(), "loaded credentials");
            table
        } else {
            info!(path = %path.display(), "credential file not found, starting with empty store");
            let table = KeyTable::default();
            write_atomic(&path, &table).await?;
            table
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Add or replace a credential owned by `user_id` and persist to disk.
    pub async fn add(&self, user_id: &str, credential: Credential) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(credential_id = %credential.id, user_id, "added credential");
        state.insert(user_id, credential);
        write_atomic(&self.path, &state).await
    }

    /// Number of stored credentials.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CredentialStore for FileStore {
    fn list_by_provider<'a>(
        &'a self,
        user_id: &'a str,
        provider: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Credential>>> {
        Box::pin(async move { Ok(self.state.lock().await.list(user_id, provider)) })
    }

    fn update_status<'a>(
        &'a self,
        id: &'a str,
        change: StatusChange,
    ) -> BoxFuture<'a, Result<Credential>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let updated = state.apply(id, change)?;
            debug!(credential_id = id, status = %updated.status, "updated credential status");
            write_atomic(&self.path, &state).await?;
            Ok(updated)
        })
    }

    fn touch_used<'a>(&'a self, id: &'a str, used_at: u64) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.touch(id, used_at)?;
            write_atomic(&self.path, &state).await
        })
    }

    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Credential>>> {
        Box::pin(async move { Ok(self.state.lock().await.get(id)) })
    }
}

/// Write the credential table to a file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets file permissions to 0600 (owner read/write only) since
/// the file contains API tokens.
async fn write_atomic(path: &Path, table: &KeyTable) -> Result<()> {
    let json = serde_json::to_string_pretty(table)
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("credential path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}
