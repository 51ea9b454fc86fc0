//! Remote actor-run boundary
//!
//! Defines the `RemoteTaskClient` trait the scheduler drives for every unit of
//! work: submit a run with a credential, poll until it is terminal, fetch the
//! resulting dataset. Failures come back as a typed `TaskError` so callers
//! decide credential fate on structured kinds, never on message text. The
//! string matching against provider responses lives in `classify`, next to the
//! HTTP adapter that sees those responses.

pub mod classify;
pub mod error;
pub mod http;
#[cfg(feature = "testing")]
pub mod testing;

pub use classify::classify_status;
pub use error::{Result, TaskError};
pub use http::ActorRunClient;

pub use common::BoxFuture;

use common::Secret;
use serde::{Deserialize, Serialize};

/// Rows produced by a finished run.
pub type Dataset = Vec<serde_json::Value>;

/// What to run remotely: an actor and its JSON input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub actor: String,
    pub input: serde_json::Value,
}

/// Handle to a submitted run. Carries the credential it was started with so
/// polling and fetching stay on the same account.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub dataset_id: Option<String>,
    pub api_key: Secret<String>,
}

/// Snapshot of a run's progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    /// Run has stopped (successfully or not).
    pub terminal: bool,
    /// Run stopped successfully. Meaningless while `terminal` is false.
    pub ok: bool,
    /// Provider status label, for logging.
    pub label: String,
}

impl RunStatus {
    pub fn running(label: impl Into<String>) -> Self {
        Self {
            terminal: false,
            ok: false,
            label: label.into(),
        }
    }

    pub fn succeeded(label: impl Into<String>) -> Self {
        Self {
            terminal: true,
            ok: true,
            label: label.into(),
        }
    }

    pub fn failed(label: impl Into<String>) -> Self {
        Self {
            terminal: true,
            ok: false,
            label: label.into(),
        }
    }
}

/// Long-running remote task API, authenticated per credential.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn RemoteTaskClient>`).
pub trait RemoteTaskClient: Send + Sync {
    /// Identifier for logging (e.g. "apify", "scripted").
    fn id(&self) -> &str;

    /// Lightweight authenticated call used to classify a credential's status.
    fn verify<'a>(&'a self, api_key: &'a Secret<String>) -> BoxFuture<'a, Result<()>>;

    /// Start a run using the given credential.
    fn submit<'a>(
        &'a self,
        spec: &'a TaskSpec,
        api_key: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<RunHandle>>;

    /// Check whether a run has finished.
    fn poll_status<'a>(&'a self, run: &'a RunHandle) -> BoxFuture<'a, Result<RunStatus>>;

    /// Fetch a finished run's dataset. An empty dataset is `Ok(vec![])`.
    fn fetch_result<'a>(&'a self, run: &'a RunHandle) -> BoxFuture<'a, Result<Dataset>>;
}
