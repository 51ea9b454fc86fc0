//! Per-item attempt loop with credential failover
//!
//! Each attempt submits the run, polls until it is terminal, waits for the
//! dataset to settle and fetches it. A failed attempt excludes its credential
//! for the rest of the item, optionally penalizes it in the store, and asks the
//! pool for a replacement. The excluded set only grows, so a credential is
//! never retried for the same item.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use key_pool::KeyPool;
use key_store::Credential;
use provider::{Dataset, RemoteTaskClient, TaskSpec};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::error::AttemptError;

/// One unit of work: a label for reporting plus the actor input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub label: String,
    pub input: serde_json::Value,
}

/// Terminal state of one item.
#[derive(Debug, Clone)]
pub struct Execution {
    pub result: std::result::Result<Dataset, String>,
    pub attempts: u32,
    /// Credentials in attempt order; the last one produced `result`.
    pub credentials_tried: Vec<String>,
    /// Credentials whose status this item changed.
    pub penalized: Vec<String>,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn last_credential(&self) -> Option<&str> {
        self.credentials_tried.last().map(String::as_str)
    }
}

/// Runs single items against the remote API with failover.
#[derive(Clone)]
pub struct TaskExecutor {
    pool: Arc<KeyPool>,
    client: Arc<dyn RemoteTaskClient>,
    poll_interval: Duration,
    max_poll_wait: Duration,
    result_settle: Duration,
}

impl TaskExecutor {
    pub fn new(pool: Arc<KeyPool>, client: Arc<dyn RemoteTaskClient>) -> Self {
        let tuning = pool.tuning();
        Self {
            poll_interval: tuning.poll_interval(),
            max_poll_wait: tuning.max_poll_wait(),
            result_settle: tuning.result_settle(),
            pool,
            client,
        }
    }

    /// Run `spec` starting with `initial`, failing over up to `max_attempts`
    /// attempts in total.
    ///
    /// `recently_recovered` holds ids the pool flipped to active earlier in
    /// the same run; replacements prefer them.
    pub async fn execute(
        &self,
        spec: &TaskSpec,
        initial: Credential,
        max_attempts: u32,
        recently_recovered: &HashSet<String>,
    ) -> Execution {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut tried = Vec::new();
        let mut penalized = Vec::new();
        let mut credential = initial;
        let mut attempt = 0u32;

        let last_error = loop {
            if attempt >= max_attempts {
                break "no attempts allowed".to_string();
            }
            attempt += 1;
            tried.push(credential.id.clone());

            let err = match self.attempt(spec, &credential).await {
                Ok(data) => {
                    metrics::counter!("batch_attempts_total", "result" => "success").increment(1);
                    debug!(credential_id = %credential.id, attempt, rows = data.len(), "attempt succeeded");
                    return Execution {
                        result: Ok(data),
                        attempts: attempt,
                        credentials_tried: tried,
                        penalized,
                    };
                }
                Err(err) => err,
            };

            metrics::counter!("batch_attempts_total", "result" => err.kind()).increment(1);
            warn!(
                credential_id = %credential.id,
                attempt,
                max_attempts,
                error = %err,
                "attempt failed"
            );
            if let Some(change) = err.penalty(self.pool.now_millis()) {
                match key_pool::transition::record(self.pool.store().as_ref(), &credential.id, change)
                    .await
                {
                    Ok(_) => penalized.push(credential.id.clone()),
                    Err(e) => {
                        warn!(credential_id = %credential.id, error = %e, "failed to record credential status")
                    }
                }
            }
            excluded.insert(credential.id.clone());

            if attempt >= max_attempts {
                break err.to_string();
            }

            match self.pool.replace(&excluded, recently_recovered).await {
                Ok(next) => {
                    info!(
                        from = %credential.id,
                        to = %next.id,
                        attempt,
                        "failing over to replacement credential"
                    );
                    credential = next;
                }
                Err(key_pool::Error::NoReplacementAvailable { .. }) => {
                    warn!(last_error = %err, "no replacement credential, giving up on item");
                    break "no replacement available".to_string();
                }
                Err(e) => break e.to_string(),
            }
        };

        Execution {
            result: Err(last_error),
            attempts: attempt,
            credentials_tried: tried,
            penalized,
        }
    }

    /// One submit → poll → fetch cycle.
    async fn attempt(
        &self,
        spec: &TaskSpec,
        credential: &Credential,
    ) -> std::result::Result<Dataset, AttemptError> {
        let run = self.client.submit(spec, &credential.api_key).await?;
        let started = Instant::now();

        loop {
            sleep(self.poll_interval).await;
            let status = self.client.poll_status(&run).await?;
            if status.terminal {
                if !status.ok {
                    return Err(AttemptError::RunFailed {
                        status: status.label,
                    });
                }
                break;
            }
            if started.elapsed() >= self.max_poll_wait {
                return Err(AttemptError::Timeout {
                    waited_secs: started.elapsed().as_secs(),
                });
            }
        }

        sleep(self.result_settle).await;
        let data = self.client.fetch_result(&run).await?;
        if data.is_empty() {
            return Err(AttemptError::NoData);
        }
        Ok(data)
    }
}
