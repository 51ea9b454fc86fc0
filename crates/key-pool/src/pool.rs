//! Credential selection and mid-task failover
//!
//! `acquire` picks keys for a run, least-recently-used first, and only pays
//! for probes when the pool is thin. `replace` picks one key for a retry from
//! already known status and never probes.
//!
//! Every call starts from a fresh store snapshot. The snapshot may be stale by
//! the time it is acted on; concurrent status writes are last-write-wins.

use std::collections::HashSet;
use std::sync::Arc;

use common::{Clock, Tuning};
use futures_util::future::join_all;
use key_store::{Credential, CredentialStore, KeyStatus};
use provider::RemoteTaskClient;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::probe::HealthProbe;
use crate::transition::{cooldown_elapsed, cooldown_remaining_millis};

/// The set of credentials a pool draws from: one user's keys for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolScope {
    pub user_id: String,
    pub provider: String,
}

impl PoolScope {
    pub fn new(user_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            provider: provider.into(),
        }
    }
}

/// Credentials handed out by `acquire`.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Selected credentials, best first.
    pub credentials: Vec<Credential>,
    /// Ids flipped back to `active` by probes during this call.
    pub recovered: HashSet<String>,
    /// Total credentials in the scope, excluded or not.
    pub pool_size: usize,
}

/// Credential pool for one scope.
pub struct KeyPool {
    scope: PoolScope,
    store: Arc<dyn CredentialStore>,
    probe: HealthProbe,
    tuning: Tuning,
    clock: Arc<dyn Clock>,
}

impl KeyPool {
    pub fn new(
        scope: PoolScope,
        store: Arc<dyn CredentialStore>,
        client: Arc<dyn RemoteTaskClient>,
        tuning: Tuning,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let probe = HealthProbe::new(store.clone(), client, clock.clone());
        Self {
            scope,
            store,
            probe,
            tuning,
            clock,
        }
    }

    pub fn scope(&self) -> &PoolScope {
        &self.scope
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// All credentials in scope, least recently used first (never-used first).
    pub async fn snapshot(&self) -> Result<Vec<Credential>> {
        let mut credentials = self
            .store
            .list_by_provider(&self.scope.user_id, &self.scope.provider)
            .await?;
        // Option orders None before Some; the sort is stable so ties keep id order.
        credentials.sort_by_key(|c| c.last_used_at);
        Ok(credentials)
    }

    /// Select up to `required` credentials for a run.
    ///
    /// 1. Enough active keys: take the `required` least recently used.
    /// 2. At least `min_active_floor` active (and at least one): take all of
    ///    them and let the caller rotate, no probing.
    /// 3. Thin pool: probe every rate-limited key and every failed key past
    ///    cooldown concurrently, then combine active and recovered keys. Any
    ///    remaining shortfall is filled with degraded keys as a best effort.
    ///
    /// Fails only when the scope holds no credentials at all.
    pub async fn acquire(&self, required: usize, excluded: &HashSet<String>) -> Result<Assignment> {
        let all = self.snapshot().await?;
        if all.is_empty() {
            warn!(
                user_id = %self.scope.user_id,
                provider = %self.scope.provider,
                "no credentials stored for provider"
            );
            return Err(Error::NoCredentialsAvailable {
                provider: self.scope.provider.clone(),
            });
        }
        let pool_size = all.len();
        let (active, rate_limited, failed) = partition(all, excluded);

        if active.len() >= required {
            debug!(required, active = active.len(), "enough active credentials");
            return Ok(Assignment {
                credentials: active.into_iter().take(required).collect(),
                recovered: HashSet::new(),
                pool_size,
            });
        }

        // A zero floor must not turn an all-degraded pool into an empty assignment.
        if !active.is_empty() && active.len() >= self.tuning.min_active_floor {
            debug!(
                required,
                active = active.len(),
                floor = self.tuning.min_active_floor,
                "active floor met, rotating without probes"
            );
            return Ok(Assignment {
                credentials: active,
                recovered: HashSet::new(),
                pool_size,
            });
        }

        let now = self.clock.now_millis();
        let cooldown = self.tuning.cooldown();
        let candidates: Vec<&Credential> = rate_limited
            .iter()
            .chain(
                failed
                    .iter()
                    .filter(|c| cooldown_elapsed(c, now, cooldown)),
            )
            .collect();

        info!(
            provider = %self.scope.provider,
            required,
            active = active.len(),
            candidates = candidates.len(),
            "pool is thin, probing recovery candidates"
        );

        let outcomes = join_all(candidates.iter().map(|c| self.probe.probe(c))).await;

        let mut recovered = HashSet::new();
        let mut recovered_credentials = Vec::new();
        let mut still_degraded = Vec::new();
        for (candidate, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) if outcome.recovered() => {
                    recovered.insert(outcome.credential.id.clone());
                    recovered_credentials.push(outcome.credential);
                }
                Ok(outcome) => still_degraded.push(outcome.credential),
                Err(e) => {
                    warn!(credential_id = %candidate.id, error = %e, "probe could not be recorded");
                    still_degraded.push((*candidate).clone());
                }
            }
        }

        let mut credentials: Vec<Credential> = active
            .into_iter()
            .chain(recovered_credentials)
            .take(required)
            .collect();

        if credentials.len() < required {
            // Keys not probed (failed, still cooling down) come last.
            let probed: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
            let unprobed = failed.iter().filter(|c| !probed.contains(c.id.as_str()));
            let mut fallback: Vec<Credential> = still_degraded;
            fallback.sort_by_key(|c| c.status != KeyStatus::RateLimited);
            fallback.extend(unprobed.cloned());
            let shortfall = required - credentials.len();
            if !fallback.is_empty() {
                warn!(
                    shortfall,
                    available = fallback.len(),
                    "filling assignment with degraded credentials"
                );
            }
            credentials.extend(fallback.into_iter().take(shortfall));
        }

        info!(
            selected = credentials.len(),
            recovered = recovered.len(),
            "credentials acquired"
        );
        Ok(Assignment {
            credentials,
            recovered,
            pool_size,
        })
    }

    /// Pick one credential for a retry.
    ///
    /// Tiers, each least recently used first: keys recovered earlier in this
    /// run, other active keys, rate-limited keys past cooldown, failed keys past
    /// cooldown. Consults stored status only.
    pub async fn replace(
        &self,
        excluded: &HashSet<String>,
        recently_recovered: &HashSet<String>,
    ) -> Result<Credential> {
        let all = self.snapshot().await?;
        let now = self.clock.now_millis();
        let cooldown = self.tuning.cooldown();
        let eligible: Vec<&Credential> = all
            .iter()
            .filter(|c| !excluded.contains(&c.id))
            .collect();

        let tiers: [&dyn Fn(&Credential) -> bool; 4] = [
            &|c: &Credential| c.status == KeyStatus::Active && recently_recovered.contains(&c.id),
            &|c: &Credential| c.status == KeyStatus::Active,
            &|c: &Credential| {
                c.status == KeyStatus::RateLimited && cooldown_elapsed(c, now, cooldown)
            },
            &|c: &Credential| c.status == KeyStatus::Failed && cooldown_elapsed(c, now, cooldown),
        ];

        for (tier, accepts) in tiers.iter().enumerate() {
            if let Some(found) = eligible.iter().find(|c| accepts(**c)) {
                debug!(
                    credential_id = %found.id,
                    tier = tier + 1,
                    excluded = excluded.len(),
                    "replacement selected"
                );
                return Ok((*found).clone());
            }
        }

        warn!(
            provider = %self.scope.provider,
            excluded = excluded.len(),
            total = all.len(),
            "no replacement credential available"
        );
        Err(Error::NoReplacementAvailable {
            provider: self.scope.provider.clone(),
            excluded: excluded.len(),
        })
    }

    /// Pool health summary.
    ///
    /// Status mapping: all active → healthy, some active → degraded,
    /// none active or empty → unhealthy. Never includes key material beyond
    /// the last four characters.
    pub async fn health(&self) -> Result<serde_json::Value> {
        let all = self.snapshot().await?;
        let now = self.clock.now_millis();
        let cooldown = self.tuning.cooldown();

        let mut active = 0usize;
        let mut rate_limited = 0usize;
        let mut failed = 0usize;
        let mut keys = Vec::with_capacity(all.len());

        for c in &all {
            let mut row = serde_json::json!({
                "id": c.id,
                "display_name": c.display_name,
                "key_hint": c.api_key.hint(),
                "status": c.status.as_str(),
                "failure_count": c.failure_count,
                "last_used_at": c.last_used_at,
                "last_failed_at": c.last_failed_at,
            });
            match c.status {
                KeyStatus::Active => active += 1,
                KeyStatus::RateLimited => rate_limited += 1,
                KeyStatus::Failed => failed += 1,
            }
            if c.status != KeyStatus::Active {
                let remaining = cooldown_remaining_millis(c, now, cooldown);
                row["cooldown_remaining_secs"] = remaining.div_ceil(1000).into();
            }
            keys.push(row);
        }

        let total = all.len();
        let status = if active == total && total > 0 {
            "healthy"
        } else if active > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        Ok(serde_json::json!({
            "user_id": self.scope.user_id,
            "provider": self.scope.provider,
            "status": status,
            "keys_total": total,
            "keys_active": active,
            "keys_rate_limited": rate_limited,
            "keys_failed": failed,
            "keys": keys,
        }))
    }
}

/// Split a sorted snapshot by status, dropping excluded ids. Order is kept.
fn partition(
    all: Vec<Credential>,
    excluded: &HashSet<String>,
) -> (Vec<Credential>, Vec<Credential>, Vec<Credential>) {
    let mut active = Vec::new();
    let mut rate_limited = Vec::new();
    let mut failed = Vec::new();
    for c in all.into_iter().filter(|c| !excluded.contains(&c.id)) {
        match c.status {
            KeyStatus::Active => active.push(c),
            KeyStatus::RateLimited => rate_limited.push(c),
            KeyStatus::Failed => failed.push(c),
        }
    }
    (active, rate_limited, failed)
}
