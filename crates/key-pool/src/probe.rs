//! Health probe: one authenticated call to reclassify a credential

use std::sync::Arc;

use common::Clock;
use key_store::{Credential, CredentialStore, KeyStatus};
use provider::{RemoteTaskClient, TaskError};
use tracing::{debug, warn};

use crate::error::Result;
use crate::transition::{probe_change, record};

/// Result of probing one credential, after the store write.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Credential as stored after the probe.
    pub credential: Credential,
    /// Probe failure, when the call did not succeed.
    pub error: Option<TaskError>,
}

impl ProbeOutcome {
    pub fn status(&self) -> KeyStatus {
        self.credential.status
    }

    pub fn recovered(&self) -> bool {
        self.credential.status == KeyStatus::Active
    }
}

/// Verifies credentials against the provider and writes the verdict back.
pub struct HealthProbe {
    store: Arc<dyn CredentialStore>,
    client: Arc<dyn RemoteTaskClient>,
    clock: Arc<dyn Clock>,
}

impl HealthProbe {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        client: Arc<dyn RemoteTaskClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            client,
            clock,
        }
    }

    /// Probe a credential and persist the outcome before returning.
    ///
    /// - success: `active`, failure count cleared, marked used
    /// - provider throttle: `rate_limited`
    /// - anything else (auth, quota, network): `failed`
    pub async fn probe(&self, credential: &Credential) -> Result<ProbeOutcome> {
        debug!(
            credential_id = %credential.id,
            client = self.client.id(),
            "probing credential"
        );
        let result = self.client.verify(&credential.api_key).await;
        let change = probe_change(&result, self.clock.now_millis());
        let updated = record(self.store.as_ref(), &credential.id, change).await?;

        let error = result.err();
        let outcome = match &error {
            None => "active",
            Some(err) => err.kind(),
        };
        metrics::counter!("key_probes_total", "outcome" => outcome).increment(1);
        if let Some(err) = &error {
            warn!(
                credential_id = %credential.id,
                error = %err,
                status = %updated.status,
                "credential probe failed"
            );
        }

        Ok(ProbeOutcome {
            credential: updated,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;
    use key_store::MemoryStore;
    use provider::testing::ScriptedClient;

    fn setup(client: ScriptedClient) -> (Arc<MemoryStore>, HealthProbe) {
        let store = Arc::new(MemoryStore::new());
        let mut degraded = Credential::new("k1", "apify", "Main", "tok1");
        degraded.status = KeyStatus::Failed;
        degraded.failure_count = 3;
        degraded.last_failed_at = Some(1_000);
        store.add("u1", degraded);
        let probe = HealthProbe::new(
            store.clone(),
            Arc::new(client),
            Arc::new(ManualClock::new(500_000)),
        );
        (store, probe)
    }

    async fn stored(store: &MemoryStore) -> Credential {
        store.get("k1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn success_restores_active_and_clears_failures() {
        let client = ScriptedClient::new();
        client.verify_ok("tok1");
        let (store, probe) = setup(client);

        let outcome = probe.probe(&stored(&store).await).await.unwrap();
        assert!(outcome.recovered());
        assert!(outcome.error.is_none());

        let c = stored(&store).await;
        assert_eq!(c.status, KeyStatus::Active);
        assert_eq!(c.failure_count, 0);
        assert_eq!(c.last_used_at, Some(500_000));
    }

    #[tokio::test]
    async fn throttle_marks_rate_limited() {
        let client = ScriptedClient::new();
        client.verify_err("tok1", TaskError::RateLimited("429".into()));
        let (store, probe) = setup(client);

        let outcome = probe.probe(&stored(&store).await).await.unwrap();
        assert_eq!(outcome.status(), KeyStatus::RateLimited);

        let c = stored(&store).await;
        assert_eq!(c.last_failed_at, Some(500_000));
        assert_eq!(c.failure_count, 4);
    }

    #[tokio::test]
    async fn quota_marks_failed() {
        let client = ScriptedClient::new();
        client.verify_err("tok1", TaskError::Quota("hard limit".into()));
        let (store, probe) = setup(client);

        let outcome = probe.probe(&stored(&store).await).await.unwrap();
        assert_eq!(outcome.status(), KeyStatus::Failed);
        assert!(matches!(outcome.error, Some(TaskError::Quota(_))));
        assert_eq!(stored(&store).await.failure_count, 4);
    }

    #[tokio::test]
    async fn probe_outcomes_are_counted_by_kind() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let client = ScriptedClient::new();
        client.verify_err("tok1", TaskError::Auth("revoked".into()));
        let (store, probe) = setup(client);
        probe.probe(&stored(&store).await).await.unwrap();

        let output = handle.render();
        assert!(output.contains("key_probes_total"));
        assert!(output.contains("outcome=\"auth\""));
        assert!(output.contains("key_status_changes_total"));
        assert!(output.contains("status=\"failed\""));
    }
}
