//! Batch scheduling over a credential pool
//!
//! Splits the work into fixed-size batches, assigns one credential per batch
//! round-robin, and runs every batch and every item concurrently. Items fail
//! independently; only an empty pool aborts the run.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use key_pool::{KeyPool, transition};
use key_store::{CredentialStore, KeyStatus, StatusChange};
use provider::{RemoteTaskClient, TaskSpec};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::executor::{Execution, TaskExecutor, WorkItem};
use crate::report::{BatchAssignment, ItemOutcome, RunReport};

/// What to run: the remote actor, the work type selecting the attempt bound,
/// and the batch size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub actor: String,
    pub work_type: Option<String>,
    pub batch_size: usize,
}

/// Runs batches of work items against one credential pool.
pub struct BatchScheduler {
    pool: Arc<KeyPool>,
    executor: TaskExecutor,
}

impl BatchScheduler {
    pub fn new(pool: Arc<KeyPool>, client: Arc<dyn RemoteTaskClient>) -> Self {
        let executor = TaskExecutor::new(pool.clone(), client);
        Self { pool, executor }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    /// Run all items and report per-item outcomes.
    ///
    /// Fails only with `NoCredentialsAvailable` (before any work starts);
    /// partial failure is reported, never raised.
    pub async fn run(&self, items: Vec<WorkItem>, plan: &RunPlan) -> Result<RunReport> {
        let started = Instant::now();
        if items.is_empty() {
            return Ok(RunReport::new(Vec::new(), Vec::new(), 0));
        }

        let tuning = self.pool.tuning();
        let mut prewarmed = HashSet::new();
        if let Some(min) = tuning.prewarm_min_active {
            match self.pool.ensure_minimum_active(min).await {
                Ok(summary) => prewarmed.extend(summary.recovered_ids),
                Err(e) => warn!(error = %e, "pre-run sweep failed, continuing with known status"),
            }
        }

        let batch_size = plan.batch_size.max(1);
        let batch_count = items.len().div_ceil(batch_size);
        let assignment = self.pool.acquire(batch_count, &HashSet::new()).await?;
        if assignment.credentials.is_empty() {
            return Err(Error::Pool(key_pool::Error::NoCredentialsAvailable {
                provider: self.pool.scope().provider.clone(),
            }));
        }

        let configured = tuning.max_attempts_for(plan.work_type.as_deref());
        let max_attempts = configured.min(assignment.pool_size as u32);
        // Keys revived by the sweep count as recovered during this run.
        let mut recovered = assignment.recovered;
        recovered.extend(prewarmed);
        let recovered = Arc::new(recovered);
        let credentials = assignment.credentials;

        info!(
            provider = %self.pool.scope().provider,
            items = items.len(),
            batches = batch_count,
            credentials = credentials.len(),
            max_attempts,
            "starting batch run"
        );

        let mut batches: Vec<Vec<WorkItem>> = Vec::with_capacity(batch_count);
        let mut remaining = items.into_iter().peekable();
        while remaining.peek().is_some() {
            batches.push(remaining.by_ref().take(batch_size).collect());
        }

        let mut assignments = Vec::with_capacity(batch_count);
        let mut labels = Vec::with_capacity(batch_count);
        let mut handles = Vec::with_capacity(batch_count);

        for (batch_index, batch) in batches.into_iter().enumerate() {
            let credential = credentials[batch_index % credentials.len()].clone();
            assignments.push(BatchAssignment {
                batch_index,
                credential_id: credential.id.clone(),
                item_count: batch.len(),
            });
            labels.push(batch.iter().map(|i| i.label.clone()).collect::<Vec<_>>());

            let executor = self.executor.clone();
            let recovered = recovered.clone();
            let actor = plan.actor.clone();
            handles.push(tokio::spawn(async move {
                let runs = batch.into_iter().map(|item| {
                    let executor = executor.clone();
                    let credential = credential.clone();
                    let recovered = recovered.clone();
                    let spec = TaskSpec {
                        actor: actor.clone(),
                        input: item.input,
                    };
                    async move {
                        executor
                            .execute(&spec, credential, max_attempts, &recovered)
                            .await
                    }
                });
                join_all(runs).await
            }));
        }

        let results = join_all(handles).await;
        let mut outcomes = Vec::new();
        let mut penalized = HashSet::new();

        for (batch_index, (result, labels)) in results.into_iter().zip(labels).enumerate() {
            match result {
                Ok(executions) => {
                    for (item_index, (execution, label)) in
                        executions.into_iter().zip(labels).enumerate()
                    {
                        penalized.extend(execution.penalized.iter().cloned());
                        outcomes.push(outcome(batch_index, item_index, label, execution));
                    }
                }
                // Reachable only when panics unwind; the release profile aborts.
                Err(e) => {
                    error!(batch_index, error = %e, "batch task failed, marking all items failed");
                    for (item_index, label) in labels.into_iter().enumerate() {
                        outcomes.push(ItemOutcome {
                            batch_index,
                            item_index,
                            label,
                            success: false,
                            data: None,
                            error: Some(format!("batch task failed: {e}")),
                            attempts: 0,
                            credential_id: None,
                            credentials_tried: Vec::new(),
                        });
                    }
                }
            }
        }

        for o in &outcomes {
            let label = if o.success { "success" } else { "failure" };
            metrics::counter!("batch_items_total", "outcome" => label).increment(1);
        }

        let report = RunReport::new(
            outcomes,
            assignments,
            started.elapsed().as_millis() as u64,
        );
        self.mark_used(&report, &penalized).await;

        info!(
            status = report.status.as_str(),
            succeeded = report.succeeded,
            failed = report.failed,
            duration_ms = report.duration_ms,
            "batch run finished"
        );
        Ok(report)
    }

    /// Post-run bookkeeping: credentials that completed at least one item are
    /// marked used, and flipped back to active unless this run penalized them.
    async fn mark_used(&self, report: &RunReport, penalized: &HashSet<String>) {
        let store = self.pool.store();
        let now = self.pool.now_millis();
        for id in report.successful_credentials() {
            let current = match store.get(id).await {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    warn!(credential_id = id, error = %e, "failed to read credential after run");
                    continue;
                }
            };
            let result = if current.status != KeyStatus::Active && !penalized.contains(id) {
                transition::record(store.as_ref(), id, StatusChange::Recovered { used_at: now })
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            } else {
                store.touch_used(id, now).await.map_err(|e| e.to_string())
            };
            if let Err(e) = result {
                warn!(credential_id = id, error = %e, "failed to mark credential used");
            }
        }
    }
}

fn outcome(batch_index: usize, item_index: usize, label: String, execution: Execution) -> ItemOutcome {
    let credential_id = execution.last_credential().map(str::to_string);
    let (success, data, error) = match execution.result {
        Ok(data) => (true, Some(data), None),
        Err(e) => (false, None, Some(e)),
    };
    ItemOutcome {
        batch_index,
        item_index,
        label,
        success,
        data,
        error,
        attempts: execution.attempts,
        credential_id,
        credentials_tried: execution.credentials_tried,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunOutcome;
    use common::{ManualClock, Tuning};
    use key_pool::PoolScope;
    use key_store::{Credential, MemoryStore};
    use provider::TaskError;
    use provider::testing::{RunBehavior, ScriptedClient};

    const NOW: u64 = 90_000_000;
    const MINUTE: u64 = 60_000;

    struct Fixture {
        store: Arc<MemoryStore>,
        client: Arc<ScriptedClient>,
        scheduler: BatchScheduler,
    }

    fn fixture(keys: Vec<Credential>, tuning: Tuning) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for key in keys {
            store.add("u1", key);
        }
        let client = Arc::new(ScriptedClient::new());
        let pool = Arc::new(KeyPool::new(
            PoolScope::new("u1", "apify"),
            store.clone(),
            client.clone(),
            tuning,
            Arc::new(ManualClock::new(NOW)),
        ));
        let scheduler = BatchScheduler::new(pool, client.clone());
        Fixture {
            store,
            client,
            scheduler,
        }
    }

    fn active(id: &str) -> Credential {
        Credential::new(id, "apify", id, format!("tok_{id}"))
    }

    fn failed(id: &str, failed_at: u64) -> Credential {
        let mut c = active(id);
        c.status = KeyStatus::Failed;
        c.failure_count = 1;
        c.last_failed_at = Some(failed_at);
        c
    }

    fn items(n: usize) -> Vec<WorkItem> {
        (1..=n)
            .map(|i| WorkItem {
                label: format!("item-{i}"),
                input: serde_json::json!({ "n": i }),
            })
            .collect()
    }

    fn plan(batch_size: usize) -> RunPlan {
        RunPlan {
            actor: "acme/profile-scraper".into(),
            work_type: None,
            batch_size,
        }
    }

    fn ok_rows(spec: &TaskSpec) -> RunBehavior {
        RunBehavior::Succeed(vec![serde_json::json!({ "n": spec.input["n"] })])
    }

    /// Fails item `n` with a quota error, succeeds everything else.
    fn quota_on(n: u64) -> impl Fn(&TaskSpec) -> RunBehavior + Send + Sync + 'static {
        move |spec: &TaskSpec| {
            if spec.input["n"] == n {
                RunBehavior::Reject(TaskError::Quota("Monthly usage hard limit exceeded".into()))
            } else {
                ok_rows(spec)
            }
        }
    }

    async fn stored(store: &MemoryStore, id: &str) -> Credential {
        store.get(id).await.unwrap().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn round_robin_batches_all_succeed() {
        let f = fixture(vec![active("k0"), active("k1"), active("k2")], Tuning::default());
        for key in ["tok_k0", "tok_k1", "tok_k2"] {
            f.client.runs_with(key, ok_rows);
        }

        let report = f.scheduler.run(items(25), &plan(10)).await.unwrap();
        assert_eq!(report.status, RunOutcome::Completed);
        assert_eq!((report.succeeded, report.failed), (25, 0));

        let assigned: Vec<_> = report
            .batches
            .iter()
            .map(|b| (b.credential_id.as_str(), b.item_count))
            .collect();
        assert_eq!(assigned, vec![("k0", 10), ("k1", 10), ("k2", 5)]);
        assert_eq!(report.credentials_used, vec!["k0", "k1", "k2"]);

        for id in ["k0", "k1", "k2"] {
            assert_eq!(stored(&f.store, id).await.last_used_at, Some(NOW));
        }
        // Items keep their batch association and input order.
        assert_eq!(report.items[12].label, "item-13");
        assert_eq!(report.items[12].batch_index, 1);
        assert_eq!(report.items[12].credential_id.as_deref(), Some("k1"));
    }

    #[tokio::test(start_paused = true)]
    async fn batches_wrap_when_fewer_credentials() {
        let f = fixture(vec![active("k0"), active("k1")], Tuning::default());
        f.client.runs_with("tok_k0", ok_rows).runs_with("tok_k1", ok_rows);

        let report = f.scheduler.run(items(7), &plan(2)).await.unwrap();
        let assigned: Vec<_> = report
            .batches
            .iter()
            .map(|b| b.credential_id.as_str())
            .collect();
        assert_eq!(assigned, vec!["k0", "k1", "k0", "k1"]);
        assert_eq!(report.succeeded, 7);
        assert!(f.client.verify_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failover_to_cooled_down_failed_key() {
        let f = fixture(
            vec![active("a"), failed("f", NOW - 2 * MINUTE)],
            Tuning::default(),
        );
        f.client.runs_with("tok_a", quota_on(2)).runs_with("tok_f", ok_rows);

        let report = f.scheduler.run(items(5), &plan(10)).await.unwrap();
        assert_eq!(report.succeeded, 5);

        let second = &report.items[1];
        assert_eq!(second.credentials_tried, vec!["a", "f"]);
        assert_eq!(second.attempts, 2);

        assert_eq!(stored(&f.store, "a").await.status, KeyStatus::Failed);
        let f_key = stored(&f.store, "f").await;
        assert_eq!(f_key.status, KeyStatus::Active);
        assert_eq!(f_key.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failover_failure_is_reported() {
        let f = fixture(
            vec![active("a"), failed("f", NOW - 2 * MINUTE)],
            Tuning::default(),
        );
        f.client
            .runs_with("tok_a", quota_on(2))
            .runs("tok_f", RunBehavior::Reject(TaskError::Auth("revoked".into())));

        let report = f.scheduler.run(items(5), &plan(10)).await.unwrap();
        assert_eq!(report.status, RunOutcome::PartialSuccess);
        assert_eq!((report.succeeded, report.failed), (4, 1));
        assert!(!report.items[1].success);
        assert_eq!(stored(&f.store, "f").await.status, KeyStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn single_key_hard_failure_fails_one_item() {
        let f = fixture(vec![active("solo")], Tuning::default());
        f.client.runs_with("tok_solo", quota_on(3));

        let report = f.scheduler.run(items(10), &plan(10)).await.unwrap();
        assert_eq!((report.succeeded, report.failed), (9, 1));
        let third = &report.items[2];
        assert!(!third.success);
        assert_eq!(third.attempts, 1, "attempts bounded by pool size");

        // Penalized during the run, so post-run bookkeeping must not revive it.
        let solo = stored(&f.store, "solo").await;
        assert_eq!(solo.status, KeyStatus::Failed);
        assert_eq!(solo.last_used_at, Some(NOW));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pool_never_starts() {
        let f = fixture(vec![], Tuning::default());

        let err = f.scheduler.run(items(3), &plan(10)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Pool(key_pool::Error::NoCredentialsAvailable { .. })
        ));
        assert!(f.client.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_items_is_an_empty_report() {
        let f = fixture(vec![], Tuning::default());
        let report = f.scheduler.run(Vec::new(), &plan(10)).await.unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.status, RunOutcome::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn work_type_attempt_bound_applies() {
        let mut tuning = Tuning::default();
        tuning.max_attempts_by_work_type.insert("comments".into(), 3);
        let f = fixture(vec![active("a"), active("b"), active("c")], tuning);
        for key in ["tok_a", "tok_b", "tok_c"] {
            f.client.runs(key, RunBehavior::Fail);
        }

        let mut plan = plan(10);
        plan.work_type = Some("comments".into());
        let report = f.scheduler.run(items(1), &plan).await.unwrap();
        assert_eq!(report.status, RunOutcome::Failed);
        assert_eq!(report.items[0].attempts, 3);
        assert_eq!(report.credentials_used, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_batch_marks_its_items_failed() {
        let f = fixture(vec![active("k0"), active("k1")], Tuning::default());
        f.client
            .runs_with("tok_k0", |_: &TaskSpec| -> RunBehavior { panic!("scripted panic") })
            .runs_with("tok_k1", ok_rows);

        let report = f.scheduler.run(items(4), &plan(2)).await.unwrap();
        assert_eq!((report.succeeded, report.failed), (2, 2));
        let first = &report.items[0];
        assert!(first.error.as_deref().unwrap_or("").starts_with("batch task failed"));
        assert_eq!(first.label, "item-1");
    }

    #[tokio::test(start_paused = true)]
    async fn failover_prefers_keys_revived_by_prewarm() {
        let tuning = Tuning {
            prewarm_min_active: Some(3),
            ..Tuning::default()
        };
        let mut a = active("a");
        a.last_used_at = Some(1);
        let mut c = active("c");
        c.last_used_at = Some(2);
        let f = fixture(vec![a, failed("b", NOW - 1), c], tuning);
        f.client.verify_ok("tok_b");
        f.client
            .runs("tok_a", RunBehavior::Reject(TaskError::Transient("502".into())))
            .runs_with("tok_b", ok_rows)
            .runs_with("tok_c", ok_rows);

        let report = f.scheduler.run(items(1), &plan(10)).await.unwrap();
        assert_eq!(f.client.verify_calls(), vec!["tok_b"]);
        assert_eq!(report.items[0].credentials_tried, vec!["a", "b"]);
        assert!(report.items[0].success);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_floor_with_only_rate_limited_keys_still_runs() {
        let tuning = Tuning {
            min_active_floor: 0,
            ..Tuning::default()
        };
        let mut rl = active("rl");
        rl.status = KeyStatus::RateLimited;
        rl.failure_count = 1;
        rl.last_failed_at = Some(NOW - 1);
        let f = fixture(vec![rl], tuning);
        f.client.verify_ok("tok_rl");
        f.client.runs_with("tok_rl", ok_rows);

        let report = f.scheduler.run(items(2), &plan(10)).await.unwrap();
        assert_eq!(report.status, RunOutcome::Completed);
        assert_eq!(f.client.verify_calls(), vec!["tok_rl"]);
        assert_eq!(stored(&f.store, "rl").await.status, KeyStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn prewarm_sweeps_before_acquire() {
        let tuning = Tuning {
            prewarm_min_active: Some(2),
            ..Tuning::default()
        };
        let f = fixture(vec![active("a"), failed("b", NOW - 1)], tuning);
        f.client.verify_ok("tok_b");
        f.client.runs_with("tok_a", ok_rows).runs_with("tok_b", ok_rows);

        let report = f.scheduler.run(items(4), &plan(2)).await.unwrap();
        assert_eq!(f.client.verify_calls(), vec!["tok_b"]);
        assert_eq!(report.batches.len(), 2);
        assert_eq!(report.credentials_used, vec!["a", "b"]);
    }
}
