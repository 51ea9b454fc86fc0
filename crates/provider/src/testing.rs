//! Scripted in-memory `RemoteTaskClient` for tests
//!
//! Behaviour is keyed by the raw API token so tests can give each credential
//! its own personality: one key verifies fine but its runs fail, another is
//! rate limited, a third hangs forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::Secret;

use crate::error::{Result, TaskError};
use crate::{BoxFuture, Dataset, RemoteTaskClient, RunHandle, RunStatus, TaskSpec};

/// How a run started with a given key behaves.
#[derive(Debug, Clone)]
pub enum RunBehavior {
    /// Run finishes successfully with these rows.
    Succeed(Dataset),
    /// `submit` itself fails.
    Reject(TaskError),
    /// `submit` works, the first poll fails.
    PollError(TaskError),
    /// Run reaches a terminal failed state.
    Fail,
    /// Run never reaches a terminal state.
    Hang,
    /// Run succeeds with an empty dataset.
    Empty,
}

type RunRule = Box<dyn Fn(&TaskSpec) -> RunBehavior + Send + Sync>;

/// Recorded `submit` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub api_key: String,
    pub spec: TaskSpec,
}

#[derive(Default)]
struct State {
    verify: HashMap<String, std::result::Result<(), TaskError>>,
    runs: HashMap<String, RunRule>,
    active_runs: HashMap<String, RunBehavior>,
    verify_calls: Vec<String>,
    submissions: Vec<Submission>,
}

/// Test double for the remote task API.
///
/// Unknown keys fail verification with `Auth` and have every run rejected.
#[derive(Default)]
pub struct ScriptedClient {
    state: Mutex<State>,
    verify_delay: Option<Duration>,
    next_run: AtomicU64,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `verify` call.
    pub fn with_verify_delay(mut self, delay: Duration) -> Self {
        self.verify_delay = Some(delay);
        self
    }

    pub fn verify_ok(&self, api_key: &str) -> &Self {
        self.lock().verify.insert(api_key.to_string(), Ok(()));
        self
    }

    pub fn verify_err(&self, api_key: &str, err: TaskError) -> &Self {
        self.lock().verify.insert(api_key.to_string(), Err(err));
        self
    }

    /// Every run started with `api_key` behaves the same way.
    pub fn runs(&self, api_key: &str, behavior: RunBehavior) -> &Self {
        self.runs_with(api_key, move |_| behavior.clone())
    }

    /// Run behaviour chosen per task, e.g. by inspecting the input.
    pub fn runs_with<F>(&self, api_key: &str, rule: F) -> &Self
    where
        F: Fn(&TaskSpec) -> RunBehavior + Send + Sync + 'static,
    {
        self.lock()
            .runs
            .insert(api_key.to_string(), Box::new(rule));
        self
    }

    /// Keys passed to `verify`, in call order.
    pub fn verify_calls(&self) -> Vec<String> {
        self.lock().verify_calls.clone()
    }

    /// Successful and failed `submit` calls, in call order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.lock().submissions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn behavior_of(&self, run: &RunHandle) -> Result<RunBehavior> {
        self.lock()
            .active_runs
            .get(&run.run_id)
            .cloned()
            .ok_or_else(|| TaskError::Transient(format!("unknown run {}", run.run_id)))
    }
}

impl RemoteTaskClient for ScriptedClient {
    fn id(&self) -> &str {
        "scripted"
    }

    fn verify<'a>(&'a self, api_key: &'a Secret<String>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(delay) = self.verify_delay {
                tokio::time::sleep(delay).await;
            }
            let key = api_key.expose().clone();
            let mut state = self.lock();
            state.verify_calls.push(key.clone());
            state
                .verify
                .get(&key)
                .cloned()
                .unwrap_or_else(|| Err(TaskError::Auth("unknown token".into())))
        })
    }

    fn submit<'a>(
        &'a self,
        spec: &'a TaskSpec,
        api_key: &'a Secret<String>,
    ) -> BoxFuture<'a, Result<RunHandle>> {
        Box::pin(async move {
            let key = api_key.expose().clone();
            let mut state = self.lock();
            state.submissions.push(Submission {
                api_key: key.clone(),
                spec: spec.clone(),
            });
            let behavior = match state.runs.get(&key) {
                Some(rule) => rule(spec),
                None => RunBehavior::Reject(TaskError::Auth("unknown token".into())),
            };
            if let RunBehavior::Reject(err) = behavior {
                return Err(err);
            }
            let run_id = format!("run_{}", self.next_run.fetch_add(1, Ordering::Relaxed));
            state.active_runs.insert(run_id.clone(), behavior);
            Ok(RunHandle {
                run_id,
                dataset_id: None,
                api_key: api_key.clone(),
            })
        })
    }

    fn poll_status<'a>(&'a self, run: &'a RunHandle) -> BoxFuture<'a, Result<RunStatus>> {
        Box::pin(async move {
            match self.behavior_of(run)? {
                RunBehavior::PollError(err) => Err(err),
                RunBehavior::Fail => Ok(RunStatus::failed("FAILED")),
                RunBehavior::Hang => Ok(RunStatus::running("RUNNING")),
                _ => Ok(RunStatus::succeeded("SUCCEEDED")),
            }
        })
    }

    fn fetch_result<'a>(&'a self, run: &'a RunHandle) -> BoxFuture<'a, Result<Dataset>> {
        Box::pin(async move {
            match self.behavior_of(run)? {
                RunBehavior::Succeed(rows) => Ok(rows),
                _ => Ok(Vec::new()),
            }
        })
    }
}
